//! HDF5 sweep files (feature `hdf5`).
//!
//! Groups map to group nodes and datasets to leaves. String datasets
//! (units, ISO timestamps) may be variable- or fixed-length.

use ::hdf5::types::{FixedAscii, TypeDescriptor, VarLenAscii, VarLenUnicode};
use ::hdf5::{Dataset, File, Group};

use super::{LeafData, TreeNode};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub enum Hdf5Node {
    Group(Group),
    Dataset(Dataset),
}

impl Hdf5Node {
    pub fn root(file: &File) -> Result<Self> {
        let group: &Group = file;
        Ok(Hdf5Node::Group(group.clone()))
    }
}

fn h5_err(e: ::hdf5::Error) -> Error {
    Error::Format(format!("hdf5: {e}"))
}

fn read_strings(ds: &Dataset) -> Result<Option<Vec<String>>> {
    let descriptor = ds.dtype().and_then(|t| t.to_descriptor()).map_err(h5_err)?;
    let strings = match descriptor {
        TypeDescriptor::VarLenUnicode => ds.read_raw::<VarLenUnicode>().map_err(h5_err)?
            .iter().map(|s| s.as_str().to_owned()).collect(),
        TypeDescriptor::VarLenAscii => ds.read_raw::<VarLenAscii>().map_err(h5_err)?
            .iter().map(|s| s.as_str().to_owned()).collect(),
        TypeDescriptor::FixedAscii(_) | TypeDescriptor::FixedUnicode(_) => {
            ds.read_raw::<FixedAscii<256>>().map_err(h5_err)?
                .iter().map(|s| s.as_str().to_owned()).collect()
        }
        _ => return Ok(None),
    };
    Ok(Some(strings))
}

impl TreeNode for Hdf5Node {
    fn has_keys(&self) -> bool {
        matches!(self, Hdf5Node::Group(_))
    }

    fn keys(&self) -> Vec<String> {
        match self {
            Hdf5Node::Group(g) => g.member_names().unwrap_or_default(),
            Hdf5Node::Dataset(_) => Vec::new(),
        }
    }

    fn get(&self, key: &str) -> Option<Self> {
        let Hdf5Node::Group(g) = self else { return None };
        if !g.link_exists(key) {
            return None;
        }
        if let Ok(child) = g.group(key) {
            return Some(Hdf5Node::Group(child));
        }
        g.dataset(key).ok().map(Hdf5Node::Dataset)
    }

    fn leaf_value(&self) -> Result<Option<LeafData>> {
        let Hdf5Node::Dataset(ds) = self else { return Ok(None) };
        let descriptor = ds.dtype().and_then(|t| t.to_descriptor()).map_err(h5_err)?;
        match descriptor {
            TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) | TypeDescriptor::Float(_) => {
                Ok(Some(LeafData::Numbers(ds.read_dyn::<f64>().map_err(h5_err)?)))
            }
            TypeDescriptor::Boolean => {
                let flags = ds.read_dyn::<bool>().map_err(h5_err)?;
                Ok(Some(LeafData::Numbers(flags.mapv(|b| if b { 1.0 } else { 0.0 }))))
            }
            _ => Ok(read_strings(ds)?.map(LeafData::Text)),
        }
    }

    fn leaf_units(&self) -> Option<String> {
        let Hdf5Node::Dataset(ds) = self else { return None };
        match read_strings(ds) {
            Ok(Some(strings)) => strings.into_iter().next(),
            _ => None,
        }
    }
}
