//! Index expressions: parsing, normalization and evaluation against a shape.
//!
//! An [`NdIndex`] is built once, either from the textual grammar
//! (`"1, ::2, ..."`), from integer coordinates, or through the builder
//! methods. It stays independent of any array until [`NdIndex::resolve`]
//! binds negative positions and the ellipsis to a concrete [`Shape`].

use crate::error::Error;
use crate::shape::Shape;
use std::fmt;
use std::str::FromStr;

/// Boolean selector covering one or more consecutive axes.
#[derive(Debug, Clone, PartialEq)]
pub struct BooleanMask {
    shape: Vec<usize>,
    values: Vec<bool>,
}

impl BooleanMask {
    pub fn new(values: Vec<bool>, shape: &[usize]) -> Result<Self, Error> {
        let expected: usize = shape.iter().product();
        if shape.is_empty() || expected != values.len() {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                actual: vec![values.len()],
            });
        }
        Ok(BooleanMask {
            shape: shape.to_vec(),
            values,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn values(&self) -> &[bool] {
        &self.values
    }

    pub fn count(&self) -> usize {
        self.values.iter().filter(|&&v| v).count()
    }
}

/// One selector of an index expression.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexElement {
    /// A single position; negative values count from the end. Removes the axis.
    Point(i64),
    /// `start:stop:step` with Python semantics. `step` is never zero.
    Slice {
        start: Option<i64>,
        stop: Option<i64>,
        step: i64,
    },
    /// Expands to as many full slices as needed to cover the remaining axes.
    Ellipsis,
    /// Collapses the covered axes into one axis holding the selected elements.
    Mask(BooleanMask),
}

impl IndexElement {
    pub fn all() -> Self {
        IndexElement::Slice {
            start: None,
            stop: None,
            step: 1,
        }
    }

    fn axes_consumed(&self) -> usize {
        match self {
            IndexElement::Point(_) | IndexElement::Slice { .. } => 1,
            IndexElement::Ellipsis => 0,
            IndexElement::Mask(mask) => mask.shape.len(),
        }
    }
}

impl fmt::Display for IndexElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexElement::Point(p) => write!(f, "{}", p),
            IndexElement::Slice { start, stop, step } => {
                if let Some(s) = start {
                    write!(f, "{}", s)?;
                }
                write!(f, ":")?;
                if let Some(s) = stop {
                    write!(f, "{}", s)?;
                }
                if *step != 1 {
                    write!(f, ":{}", step)?;
                }
                Ok(())
            }
            IndexElement::Ellipsis => write!(f, "..."),
            IndexElement::Mask(mask) => write!(f, "<mask {:?}>", mask.shape),
        }
    }
}

/// A parsed, rank-independent sub-selection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NdIndex {
    elements: Vec<IndexElement>,
}

impl NdIndex {
    /// The empty index, selecting the whole array.
    pub fn new() -> Self {
        NdIndex::default()
    }

    /// Parses the textual grammar.
    ///
    /// Elements are separated by commas: an integer selects one position,
    /// `start:stop:step` (each part optional) selects a range, and `...`
    /// stands for all remaining axes.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let parse_err = |reason: String| Error::IndexParse {
            input: input.to_string(),
            reason,
        };
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(NdIndex::new());
        }

        let mut index = NdIndex::new();
        for raw in trimmed.split(',') {
            let part = raw.trim();
            if part.is_empty() {
                return Err(parse_err("empty element".to_string()));
            }
            if part == "..." {
                index.push(IndexElement::Ellipsis)?;
                continue;
            }
            if part.contains(':') {
                let fields: Vec<&str> = part.split(':').map(str::trim).collect();
                if fields.len() > 3 {
                    return Err(parse_err(format!("too many ':' in {:?}", part)));
                }
                let field = |i: usize| -> Result<Option<i64>, Error> {
                    match fields.get(i) {
                        None => Ok(None),
                        Some(s) if s.is_empty() => Ok(None),
                        Some(s) => s
                            .parse::<i64>()
                            .map(Some)
                            .map_err(|_| parse_err(format!("{:?} is not an integer", s))),
                    }
                };
                let step = field(2)?.unwrap_or(1);
                if step == 0 {
                    return Err(parse_err("slice step cannot be zero".to_string()));
                }
                index.push(IndexElement::Slice {
                    start: field(0)?,
                    stop: field(1)?,
                    step,
                })?;
                continue;
            }
            let point = part
                .parse::<i64>()
                .map_err(|_| parse_err(format!("{:?} is not an integer", part)))?;
            index.push(IndexElement::Point(point))?;
        }
        Ok(index)
    }

    /// One point selector per coordinate.
    pub fn from_points(points: &[i64]) -> Self {
        NdIndex {
            elements: points.iter().map(|&p| IndexElement::Point(p)).collect(),
        }
    }

    pub fn point(mut self, index: i64) -> Self {
        self.elements.push(IndexElement::Point(index));
        self
    }

    pub fn slice(self, start: i64, stop: i64) -> Result<Self, Error> {
        self.slice_step(Some(start), Some(stop), 1)
    }

    pub fn slice_step(mut self, start: Option<i64>, stop: Option<i64>, step: i64) -> Result<Self, Error> {
        if step == 0 {
            return Err(Error::InvalidIndex("slice step cannot be zero".to_string()));
        }
        self.elements.push(IndexElement::Slice { start, stop, step });
        Ok(self)
    }

    pub fn all(mut self) -> Self {
        self.elements.push(IndexElement::all());
        self
    }

    pub fn ellipsis(self) -> Result<Self, Error> {
        let mut index = self;
        index.push(IndexElement::Ellipsis)?;
        Ok(index)
    }

    pub fn mask(mut self, mask: BooleanMask) -> Self {
        self.elements.push(IndexElement::Mask(mask));
        self
    }

    fn push(&mut self, element: IndexElement) -> Result<(), Error> {
        if element == IndexElement::Ellipsis && self.has_ellipsis() {
            return Err(Error::InvalidIndex(
                "an index may contain at most one ellipsis".to_string(),
            ));
        }
        self.elements.push(element);
        Ok(())
    }

    pub fn elements(&self) -> &[IndexElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn has_ellipsis(&self) -> bool {
        self.elements.contains(&IndexElement::Ellipsis)
    }

    /// Binds this expression to `shape`.
    pub fn resolve(&self, shape: &Shape) -> Result<ResolvedIndex, Error> {
        let rank = shape.rank();
        let consumed: usize = self.elements.iter().map(IndexElement::axes_consumed).sum();
        if consumed > rank {
            return Err(Error::InvalidIndex(format!(
                "index {} addresses {} axes but the array has rank {}",
                self, consumed, rank
            )));
        }

        let mut selections = Vec::with_capacity(rank);
        let mut axis = 0;
        for element in &self.elements {
            match element {
                IndexElement::Ellipsis => {
                    for _ in 0..(rank - consumed) {
                        selections.push(AxisSelection::full(shape[axis]));
                        axis += 1;
                    }
                }
                IndexElement::Point(p) => {
                    let dim = shape[axis];
                    let resolved = if *p < 0 { *p + dim as i64 } else { *p };
                    if resolved < 0 || resolved >= dim as i64 {
                        return Err(Error::IndexOutOfBounds {
                            index: *p,
                            size: dim,
                        });
                    }
                    selections.push(AxisSelection::Point(resolved as usize));
                    axis += 1;
                }
                IndexElement::Slice { start, stop, step } => {
                    selections.push(AxisSelection::range(shape[axis], *start, *stop, *step));
                    axis += 1;
                }
                IndexElement::Mask(mask) => {
                    let covered = &shape.dims()[axis..axis + mask.shape.len()];
                    if covered != mask.shape.as_slice() {
                        return Err(Error::ShapeMismatch {
                            expected: covered.to_vec(),
                            actual: mask.shape.clone(),
                        });
                    }
                    let mask_shape = Shape::new(mask.shape.clone());
                    let positions = mask
                        .values
                        .iter()
                        .enumerate()
                        .filter(|(_, &v)| v)
                        .map(|(i, _)| mask_shape.unravel(i))
                        .collect();
                    selections.push(AxisSelection::Mask { positions });
                    axis += mask.shape.len();
                }
            }
        }
        while axis < rank {
            selections.push(AxisSelection::full(shape[axis]));
            axis += 1;
        }

        let dims = selections
            .iter()
            .filter_map(|s| match s {
                AxisSelection::Point(_) => None,
                AxisSelection::Range { len, .. } => Some(*len),
                AxisSelection::Mask { positions } => Some(positions.len()),
            })
            .collect::<Vec<_>>();

        Ok(ResolvedIndex {
            source: shape.clone(),
            selections,
            shape: Shape::new(dims),
        })
    }
}

impl FromStr for NdIndex {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NdIndex::parse(s)
    }
}

impl fmt::Display for NdIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.elements.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

impl From<&[i64]> for NdIndex {
    fn from(points: &[i64]) -> Self {
        NdIndex::from_points(points)
    }
}

/// Selection on one (or, for masks, several) source axes after resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum AxisSelection {
    Point(usize),
    /// Positions `start + i * step` for `i in 0..len`.
    Range { start: isize, step: isize, len: usize },
    /// Multi-indices (over the covered axes) of the selected elements.
    Mask { positions: Vec<Vec<usize>> },
}

impl AxisSelection {
    fn full(dim: usize) -> Self {
        AxisSelection::Range {
            start: 0,
            step: 1,
            len: dim,
        }
    }

    fn range(dim: usize, start: Option<i64>, stop: Option<i64>, step: i64) -> Self {
        let dim = dim as i64;
        let (start, len) = if step > 0 {
            let clamp = |v: i64| {
                let v = if v < 0 { v + dim } else { v };
                v.clamp(0, dim)
            };
            let start = start.map(clamp).unwrap_or(0);
            let stop = stop.map(clamp).unwrap_or(dim);
            // Widened so steps near the i64 bounds cannot overflow
            let len = if stop > start {
                (i128::from(stop - start) + i128::from(step) - 1) / i128::from(step)
            } else {
                0
            };
            (start, len)
        } else {
            let clamp = |v: i64| {
                let v = if v < 0 { v + dim } else { v };
                v.clamp(-1, dim - 1)
            };
            let start = start.map(clamp).unwrap_or(dim - 1);
            let stop = stop.map(clamp).unwrap_or(-1);
            let neg = -i128::from(step);
            let len = if start > stop {
                (i128::from(start - stop) + neg - 1) / neg
            } else {
                0
            };
            (start, len)
        };
        AxisSelection::Range {
            start: start as isize,
            step: step as isize,
            len: len as usize,
        }
    }

    fn axes_consumed(&self) -> usize {
        match self {
            AxisSelection::Mask { positions } => positions.first().map_or(1, Vec::len),
            _ => 1,
        }
    }
}

/// An index bound to a concrete source shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedIndex {
    source: Shape,
    selections: Vec<AxisSelection>,
    shape: Shape,
}

impl ResolvedIndex {
    /// Shape of the selection: point axes removed, ranges resized, masks collapsed.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn source_shape(&self) -> &Shape {
        &self.source
    }

    pub fn selections(&self) -> &[AxisSelection] {
        &self.selections
    }

    pub fn size(&self) -> usize {
        self.shape.size()
    }

    /// Row-major offsets into the source buffer, in selection order.
    pub fn offsets(&self) -> Vec<usize> {
        let strides = self.source.strides();
        let mut offsets = vec![0usize];
        let mut axis = 0;
        for selection in &self.selections {
            let parts: Vec<usize> = match selection {
                AxisSelection::Point(p) => vec![p * strides[axis]],
                AxisSelection::Range { start, step, len } => (0..*len)
                    .map(|i| (*start + i as isize * *step) as usize * strides[axis])
                    .collect(),
                AxisSelection::Mask { positions } => positions
                    .iter()
                    .map(|pos| {
                        pos.iter()
                            .enumerate()
                            .map(|(j, &p)| p * strides[axis + j])
                            .sum()
                    })
                    .collect(),
            };
            axis += selection.axes_consumed();
            let mut next = Vec::with_capacity(offsets.len() * parts.len());
            for &base in &offsets {
                for &part in &parts {
                    next.push(base + part);
                }
            }
            offsets = next;
        }
        offsets
    }

    /// Offset of the single addressed element, failing otherwise.
    pub fn single_offset(&self) -> Result<usize, Error> {
        let offsets = self.offsets();
        if offsets.len() != 1 {
            return Err(Error::InvalidIndex(format!(
                "selection of shape {} addresses {} elements, expected exactly one",
                self.shape,
                offsets.len()
            )));
        }
        Ok(offsets[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grammar() {
        let idx = NdIndex::parse(" 1, :, ::2, -3:, ... ").unwrap();
        assert_eq!(idx.len(), 5);
        assert_eq!(idx.elements()[0], IndexElement::Point(1));
        assert_eq!(idx.elements()[1], IndexElement::all());
        assert_eq!(
            idx.elements()[2],
            IndexElement::Slice {
                start: None,
                stop: None,
                step: 2
            }
        );
        assert_eq!(
            idx.elements()[3],
            IndexElement::Slice {
                start: Some(-3),
                stop: None,
                step: 1
            }
        );
        assert_eq!(idx.elements()[4], IndexElement::Ellipsis);
        assert_eq!(idx.to_string(), "1, :, ::2, -3:, ...");
    }

    #[test]
    fn rejects_bad_text() {
        assert!(NdIndex::parse("1,,2").is_err());
        assert!(NdIndex::parse("a").is_err());
        assert!(NdIndex::parse("::0").is_err());
        assert!(NdIndex::parse("1:2:3:4").is_err());
        assert!(NdIndex::parse("..., ...").is_err());
    }

    #[test]
    fn resolves_points_and_ranges() {
        let shape = Shape::from([4, 5]);
        let r = NdIndex::parse("-1, 1:4").unwrap().resolve(&shape).unwrap();
        assert_eq!(r.shape(), &Shape::from([3]));
        assert_eq!(r.offsets(), vec![16, 17, 18]);

        let r = NdIndex::parse("::-2").unwrap().resolve(&shape).unwrap();
        assert_eq!(r.shape(), &Shape::from([2, 5]));
        assert_eq!(r.offsets()[0], 15);
        assert_eq!(r.offsets()[5], 5);
    }

    #[test]
    fn ellipsis_fills_middle_axes() {
        let shape = Shape::from([2, 3, 4]);
        let r = NdIndex::parse("..., 0").unwrap().resolve(&shape).unwrap();
        assert_eq!(r.shape(), &Shape::from([2, 3]));
        let r = NdIndex::parse("1, ...").unwrap().resolve(&shape).unwrap();
        assert_eq!(r.shape(), &Shape::from([3, 4]));
    }

    #[test]
    fn too_many_selectors_fail() {
        let shape = Shape::from([2]);
        let err = NdIndex::parse("0, 0").unwrap().resolve(&shape).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidIndex);
        assert!(NdIndex::parse("2").unwrap().resolve(&shape).is_err());
        assert!(NdIndex::parse("-3").unwrap().resolve(&shape).is_err());
    }

    #[test]
    fn out_of_range_slices_clamp() {
        let shape = Shape::from([3]);
        let r = NdIndex::parse("1:100").unwrap().resolve(&shape).unwrap();
        assert_eq!(r.offsets(), vec![1, 2]);
        let r = NdIndex::parse("5:").unwrap().resolve(&shape).unwrap();
        assert_eq!(r.size(), 0);
    }

    #[test]
    fn extreme_steps_select_at_most_one() {
        let shape = Shape::from([5]);
        let r = NdIndex::parse("0:3:9223372036854775807").unwrap().resolve(&shape).unwrap();
        assert_eq!(r.offsets(), vec![0]);
        let r = NdIndex::parse("::-9223372036854775808").unwrap().resolve(&shape).unwrap();
        assert_eq!(r.offsets(), vec![4]);
        let r = NdIndex::parse("-9223372036854775808:").unwrap().resolve(&shape).unwrap();
        assert_eq!(r.size(), 5);
        let r = NdIndex::parse("3:1:9223372036854775807").unwrap().resolve(&shape).unwrap();
        assert_eq!(r.size(), 0);
    }

    #[test]
    fn mask_collapses_axes() {
        let shape = Shape::from([2, 2, 3]);
        let mask = BooleanMask::new(vec![true, false, false, true], &[2, 2]).unwrap();
        let r = NdIndex::new().mask(mask).resolve(&shape).unwrap();
        assert_eq!(r.shape(), &Shape::from([2, 3]));
        assert_eq!(r.offsets(), vec![0, 1, 2, 9, 10, 11]);
    }

    #[test]
    fn single_offset_requires_one_element() {
        let shape = Shape::from([2, 3]);
        let r = NdIndex::from_points(&[1, -1]).resolve(&shape).unwrap();
        assert_eq!(r.single_offset().unwrap(), 5);
        let r = NdIndex::from_points(&[1]).resolve(&shape).unwrap();
        assert!(r.single_offset().is_err());
    }
}
