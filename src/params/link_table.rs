use crate::error::ConfigurationError;
use crate::params::broadcast::BroadcastSpec;

use log::debug;
use ndarray::{Array2, ArrayView2};
use serde::Serialize;
use std::collections::HashMap;

/// Sharing and fixing of the `npar` parameters of every dataset
///
/// A parameter can be shared by all datasets or fixed per dataset, but never both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParameterSpec {
    shared: Vec<bool>,
    fixed: Array2<bool>,
}

impl ParameterSpec {
    /// `fixed` is broadcast over datasets when given per parameter, `None` means nothing is fixed
    pub fn new(
        nsets: usize,
        shared: Vec<bool>,
        fixed: Option<BroadcastSpec<bool>>,
    ) -> Result<Self, ConfigurationError> {
        let npar = shared.len();
        if npar == 0 {
            return Err(ConfigurationError::NoParameters);
        }
        if nsets == 0 {
            return Err(ConfigurationError::NoDatasets);
        }
        let fixed = match fixed {
            Some(fixed) => fixed.expand("fixed", nsets, npar)?,
            None => Array2::from_elem((nsets, npar), false),
        };
        for ((dataset, parameter), &is_fixed) in fixed.indexed_iter() {
            if is_fixed && shared[parameter] {
                return Err(ConfigurationError::SharedAndFixed { dataset, parameter });
            }
        }
        Ok(Self { shared, fixed })
    }

    #[inline]
    pub fn nsets(&self) -> usize {
        self.fixed.nrows()
    }

    #[inline]
    pub fn npar(&self) -> usize {
        self.shared.len()
    }

    pub fn shared(&self) -> &[bool] {
        &self.shared
    }

    pub fn fixed(&self) -> ArrayView2<'_, bool> {
        self.fixed.view()
    }

    /// Number of fixed parameters of dataset `i`
    pub fn nfixed(&self, i: usize) -> usize {
        self.fixed.row(i).iter().filter(|&&f| f).count()
    }

    /// Number of parameters varied for dataset `i`, shared ones included
    pub fn nvaried(&self, i: usize) -> usize {
        self.npar() - self.nfixed(i)
    }
}

/// Where a (dataset, parameter) slot takes its value from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Link {
    /// Index in the reduced free-parameter vector
    Free(usize),
    /// Flat index `i * npar + j` of the fixed constant in the dense initial guess
    Fixed(usize),
}

/// Immutable map from every (dataset, parameter) slot to the reduced free-parameter vector
///
/// Non-negative entries are free indices, an entry `-k-1` marks a slot fixed to the constant with
/// flat index `k`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LinkTable {
    links: Array2<isize>,
    /// First (dataset, parameter) slot of every free index
    owners: Vec<(usize, usize)>,
}

impl LinkTable {
    pub fn resolve(spec: &ParameterSpec) -> Self {
        let (nsets, npar) = (spec.nsets(), spec.npar());
        let mut links = Array2::from_shape_fn((nsets, npar), |(i, j)| (i * npar + j) as isize);
        // canonicalize shared slots to the dataset 0 id
        for (j, _) in spec.shared.iter().enumerate().filter(|(_, s)| **s) {
            links.column_mut(j).fill(j as isize);
        }
        for (link, _) in links.iter_mut().zip(spec.fixed.iter()).filter(|(_, f)| **f) {
            *link = -*link - 1;
        }

        let mut dense_ids = HashMap::new();
        let mut owners = Vec::new();
        for ((i, j), link) in links.indexed_iter_mut() {
            if *link < 0 {
                continue;
            }
            let next = dense_ids.len();
            let id = *dense_ids.entry(*link).or_insert_with(|| {
                owners.push((i, j));
                next
            });
            *link = id as isize;
        }
        debug!(
            "resolved {} free parameters for {} datasets with {} parameters each",
            owners.len(),
            nsets,
            npar
        );
        Self { links, owners }
    }

    #[inline]
    pub fn nsets(&self) -> usize {
        self.links.nrows()
    }

    #[inline]
    pub fn npar(&self) -> usize {
        self.links.ncols()
    }

    /// Length of the reduced free-parameter vector
    #[inline]
    pub fn nfree(&self) -> usize {
        self.owners.len()
    }

    #[inline]
    pub fn link(&self, dataset: usize, parameter: usize) -> Link {
        decode(self.links[[dataset, parameter]])
    }

    /// Links of a single dataset
    pub fn row(&self, dataset: usize) -> impl Iterator<Item = Link> + '_ {
        self.links.row(dataset).into_iter().map(|&l| decode(l))
    }

    /// Raw signed table
    pub fn as_array(&self) -> ArrayView2<'_, isize> {
        self.links.view()
    }

    /// First (dataset, parameter) slot which maps to each free index
    pub fn owners(&self) -> &[(usize, usize)] {
        &self.owners
    }
}

#[inline]
fn decode(link: isize) -> Link {
    if link >= 0 {
        Link::Free(link as usize)
    } else {
        Link::Fixed((-link - 1) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::array;

    fn links(nsets: usize, shared: Vec<bool>, fixed: Option<BroadcastSpec<bool>>) -> LinkTable {
        LinkTable::resolve(&ParameterSpec::new(nsets, shared, fixed).unwrap())
    }

    #[test]
    fn one_shared_of_three() {
        let table = links(2, vec![true, false, false], None);
        assert_eq!(table.nfree(), 5);
        assert_eq!(table.as_array(), array![[0, 1, 2], [0, 3, 4]]);
        assert_eq!(table.owners(), &[(0, 0), (0, 1), (0, 2), (1, 1), (1, 2)]);
    }

    #[test]
    fn nothing_shared_nothing_fixed() {
        let table = links(3, vec![false; 2], None);
        assert_eq!(table.nfree(), 6);
        assert_eq!(table.as_array(), array![[0, 1], [2, 3], [4, 5]]);
    }

    #[test]
    fn fixed_slots_are_encoded_negative() {
        let fixed = BroadcastSpec::PerDatasetPerParameter(vec![
            vec![false, false, true],
            vec![false, true, false],
        ]);
        let table = links(2, vec![true, false, false], Some(fixed));
        assert_eq!(table.nfree(), 3);
        assert_eq!(table.as_array(), array![[0, 1, -3], [0, -5, 2]]);
        assert_eq!(table.link(0, 2), Link::Fixed(2));
        assert_eq!(table.link(1, 1), Link::Fixed(4));
        assert_eq!(table.link(1, 2), Link::Free(2));
        let row: Vec<_> = table.row(1).collect();
        assert_eq!(row, vec![Link::Free(0), Link::Fixed(4), Link::Free(2)]);
    }

    #[test]
    fn fixed_broadcast_over_datasets() {
        let spec = ParameterSpec::new(
            3,
            vec![false, false],
            Some(BroadcastSpec::PerParameter(vec![false, true])),
        )
        .unwrap();
        assert_eq!(spec.nfixed(2), 1);
        assert_eq!(spec.nvaried(2), 1);
        let table = LinkTable::resolve(&spec);
        assert_eq!(table.nfree(), 3);
        assert_eq!(table.as_array(), array![[0, -2], [1, -4], [2, -6]]);
    }

    #[test]
    fn shared_links_are_identical() {
        let table = links(4, vec![false, true, true], None);
        for j in [1, 2] {
            let column: Vec<_> = (0..4).map(|i| table.link(i, j)).collect();
            assert!(column.iter().all(|&l| l == column[0]));
        }
        assert_eq!(table.nfree(), 2 + 4);
    }

    #[test]
    fn shared_and_fixed_is_rejected() {
        let fixed =
            BroadcastSpec::PerDatasetPerParameter(vec![vec![false, false], vec![true, false]]);
        assert_eq!(
            ParameterSpec::new(2, vec![true, false], Some(fixed)),
            Err(ConfigurationError::SharedAndFixed {
                dataset: 1,
                parameter: 0
            })
        );
    }

    #[test]
    fn fixed_shape_is_checked() {
        let fixed = BroadcastSpec::PerParameter(vec![false, true, false]);
        assert!(matches!(
            ParameterSpec::new(2, vec![true, false], Some(fixed)),
            Err(ConfigurationError::WrongShape { name: "fixed", .. })
        ));
    }

    #[test]
    fn empty_spec_is_rejected() {
        assert_eq!(
            ParameterSpec::new(2, vec![], None),
            Err(ConfigurationError::NoParameters)
        );
        assert_eq!(
            ParameterSpec::new(0, vec![true], None),
            Err(ConfigurationError::NoDatasets)
        );
    }
}
