// rust/pipeline-core/src/pipeline/batch.rs

//! Grouping of elements into fixed-size batches.

use super::types::{Batch, Element, TokenMatrix};
use crate::error::{PipelineError, Result};

/// Stacks `elements` into one batch.
///
/// All elements must be of the same kind and width; a mismatch is a shape
/// error.
pub fn assemble_batch(elements: &[Element]) -> Result<Batch> {
    let first = elements
        .first()
        .ok_or_else(|| PipelineError::shape(1, 0, "empty batch"))?;
    let width = first.width();

    for (i, element) in elements.iter().enumerate() {
        if element.kind() != first.kind() {
            return Err(PipelineError::shape(
                width,
                element.width(),
                format!(
                    "element {i} is a {}, expected a {}",
                    element.kind(),
                    first.kind()
                ),
            ));
        }
        if element.width() != width {
            return Err(PipelineError::shape(
                width,
                element.width(),
                format!("element {i} of batch"),
            ));
        }
    }

    match first {
        Element::Pair(_) => {
            let pairs = elements.iter().filter_map(|e| match e {
                Element::Pair(pair) => Some(pair),
                Element::Sequence(_) => None,
            });
            let inputs = TokenMatrix::from_rows(pairs.clone().map(|p| p.input.as_slice()), width)?;
            let targets = TokenMatrix::from_rows(pairs.map(|p| p.target.as_slice()), width)?;
            Ok(Batch::Pairs { inputs, targets })
        }
        Element::Sequence(_) => {
            let rows = elements.iter().filter_map(|e| match e {
                Element::Sequence(seq) => Some(seq.as_slice()),
                Element::Pair(_) => None,
            });
            Ok(Batch::Sequences {
                tokens: TokenMatrix::from_rows(rows, width)?,
            })
        }
    }
}

/// Groups exactly `batch_size` elements per batch; the remainder is dropped.
pub struct Batcher<I> {
    inner: I,
    batch_size: usize,
    done: bool,
}

impl<I> Batcher<I>
where
    I: Iterator<Item = Result<Element>>,
{
    pub fn new(inner: I, batch_size: usize) -> Self {
        Self {
            inner,
            batch_size: batch_size.max(1),
            done: false,
        }
    }
}

impl<I> Iterator for Batcher<I>
where
    I: Iterator<Item = Result<Element>>,
{
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut elements = Vec::with_capacity(self.batch_size);
        while elements.len() < self.batch_size {
            match self.inner.next() {
                Some(Ok(element)) => elements.push(element),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return None;
                }
            }
        }

        let batch = assemble_batch(&elements);
        if batch.is_err() {
            self.done = true;
        }
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{FixedSeq, WindowPair};

    fn sequence(start: u32, len: usize) -> Element {
        Element::Sequence(FixedSeq::new((start..start + len as u32).collect(), len).unwrap())
    }

    fn pair(start: u32, len: usize) -> Element {
        let input = (start..start + len as u32).collect();
        let target = (start + 1..start + 1 + len as u32).collect();
        Element::Pair(WindowPair {
            input: FixedSeq::new(input, len).unwrap(),
            target: FixedSeq::new(target, len).unwrap(),
        })
    }

    #[test]
    fn test_drops_remainder() {
        let elements = (0..10).map(|i| Ok(sequence(i, 3)));
        let batches: Vec<_> = Batcher::new(elements, 4).map(|b| b.unwrap()).collect();

        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.shape() == (4, 3)));
    }

    #[test]
    fn test_pairs_batch() {
        let elements = vec![pair(0, 4), pair(10, 4)];
        let batch = assemble_batch(&elements).unwrap();

        match batch {
            Batch::Pairs { inputs, targets } => {
                assert_eq!(inputs.shape(), (2, 4));
                assert_eq!(inputs.row(1), Some(&[10, 11, 12, 13][..]));
                assert_eq!(targets.row(1), Some(&[11, 12, 13, 14][..]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_mixed_kinds_is_shape_error() {
        let elements = vec![pair(0, 4), sequence(0, 4)];
        let err = assemble_batch(&elements).unwrap_err();
        assert!(matches!(err, PipelineError::Shape { .. }));
        assert!(err.to_string().contains("element 1 is a sequence"));
    }

    #[test]
    fn test_mixed_widths_is_shape_error() {
        let elements = (0..4).map(|i| Ok(sequence(0, if i == 2 { 5 } else { 4 })));
        let mut batcher = Batcher::new(elements, 4);

        assert!(matches!(
            batcher.next(),
            Some(Err(PipelineError::Shape {
                expected: 4,
                actual: 5,
                ..
            }))
        ));
        assert!(batcher.next().is_none());
    }

    #[test]
    fn test_error_passes_through() {
        let elements = vec![Ok(sequence(0, 2)), Err(PipelineError::window(8, 2))];
        let mut batcher = Batcher::new(elements.into_iter(), 2);

        assert!(matches!(batcher.next(), Some(Err(PipelineError::Window { .. }))));
        assert!(batcher.next().is_none());
    }
}
