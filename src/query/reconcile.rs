//! Element type reconciliation across sources.

use crate::error::{Error, Result};
use crate::storage::Queryable;
use crate::types::ElementType;
use std::sync::Arc;

/// Pick the element type a federated result is exposed as.
///
/// Scans left to right starting from the first source's type, moving to a
/// later source's type whenever it is a supertype of the running one. Types
/// are only generalized along direct supertype relations seen in the list:
/// sibling types are not joined to their common ancestor, so `[Page, Media]`
/// reconciles to `Page` and querying the `Media` source as `Page` fails at
/// dispatch.
///
/// Fails only when `sources` is empty.
pub fn reconcile(sources: &[Arc<dyn Queryable>]) -> Result<ElementType> {
    match sources.split_first() {
        Some((first, rest)) => Ok(reconcile_types(
            first.element_type(),
            rest.iter().map(|s| s.element_type()),
        )),
        None => Err(Error::InvalidData(
            "Cannot reconcile the element type of zero sources".to_string(),
        )),
    }
}

pub(crate) fn reconcile_types<'a, I>(first: &ElementType, rest: I) -> ElementType
where
    I: IntoIterator<Item = &'a ElementType>,
{
    let mut element_type = first.clone();
    for candidate in rest {
        if *candidate != element_type && candidate.is_assignable_from(&element_type) {
            element_type = candidate.clone();
        }
    }
    element_type
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySource;
    use crate::types::{Field, FieldType};

    struct Lattice {
        data: ElementType,
        page: ElementType,
        media: ElementType,
        blog: ElementType,
    }

    fn lattice() -> Lattice {
        let data = ElementType::root("Data", vec![Field::new("id", FieldType::Int)]);
        let page = ElementType::derive("Page", &data, vec![]);
        let media = ElementType::derive("Media", &data, vec![]);
        let blog = ElementType::derive("BlogPage", &page, vec![]);
        Lattice {
            data,
            page,
            media,
            blog,
        }
    }

    fn sources(types: &[&ElementType]) -> Vec<Arc<dyn Queryable>> {
        types
            .iter()
            .map(|t| Arc::new(MemorySource::empty((*t).clone())) as Arc<dyn Queryable>)
            .collect()
    }

    #[test]
    fn test_single_source() {
        let l = lattice();
        assert_eq!(reconcile(&sources(&[&l.page])).unwrap(), l.page);
    }

    #[test]
    fn test_generalizes_to_later_supertype() {
        let l = lattice();
        assert_eq!(reconcile(&sources(&[&l.blog, &l.page])).unwrap(), l.page);
        assert_eq!(reconcile(&sources(&[&l.page, &l.blog, &l.data])).unwrap(), l.data);
    }

    #[test]
    fn test_keeps_running_type_for_later_subtype() {
        let l = lattice();
        assert_eq!(reconcile(&sources(&[&l.data, &l.page])).unwrap(), l.data);
    }

    #[test]
    fn test_empty_sources() {
        assert!(reconcile(&[]).is_err());
    }

    #[test]
    fn test_siblings_are_not_joined() {
        let l = lattice();
        assert_eq!(reconcile(&sources(&[&l.page, &l.media])).unwrap(), l.page);
        assert_eq!(reconcile(&sources(&[&l.media, &l.blog])).unwrap(), l.media);
    }
}
