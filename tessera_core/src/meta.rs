use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Most fixed-size metalayers a super-chunk may carry.
pub const MAX_METALAYERS: usize = 16;
/// Most variable-length metalayers a super-chunk may carry.
pub const MAX_VLMETALAYERS: usize = 8 * 1024;
pub const MAX_METALAYER_NAME: usize = 31;

/// Metalayers shared between a super-chunk and the contexts it created.
pub type SharedMetalayers = Arc<RwLock<Metalayers>>;

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_METALAYER_NAME {
        return Err(Error::InvalidInput(format!(
            "metalayer name must be 1..={MAX_METALAYER_NAME} bytes, got {:?}",
            name
        )));
    }
    Ok(())
}

/// Named fixed-size metadata attached to a super-chunk.
///
/// The size of a metalayer is fixed when it is added; later updates must
/// keep it. Filters that need array-wide information (shapes, scales) read
/// it from here through [`crate::codec::FilterParams::metalayers`].
#[derive(Debug, Default, Clone)]
pub struct Metalayers {
    layers: Vec<(String, Vec<u8>)>,
}

impl Metalayers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Position of `name`, if present.
    pub fn exists(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.exists(name).map(|i| self.layers[i].1.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|(n, _)| n.as_str())
    }

    /// Add a new metalayer and return its position.
    pub fn add(&mut self, name: &str, content: &[u8]) -> Result<usize> {
        check_name(name)?;
        if self.exists(name).is_some() {
            return Err(Error::InvalidInput(format!("metalayer {name:?} already exists")));
        }
        if self.layers.len() >= MAX_METALAYERS {
            return Err(Error::InvalidInput(format!(
                "cannot add more than {MAX_METALAYERS} metalayers"
            )));
        }
        self.layers.push((name.to_string(), content.to_vec()));
        Ok(self.layers.len() - 1)
    }

    /// Overwrite an existing metalayer with content of the same size.
    pub fn update(&mut self, name: &str, content: &[u8]) -> Result<usize> {
        let idx = self
            .exists(name)
            .ok_or_else(|| Error::InvalidInput(format!("metalayer {name:?} not found")))?;
        let current = &mut self.layers[idx].1;
        if current.len() != content.len() {
            return Err(Error::InvalidInput(format!(
                "metalayer {name:?} is {} bytes; update has {}",
                current.len(),
                content.len()
            )));
        }
        current.copy_from_slice(content);
        Ok(idx)
    }
}

/// Named variable-length metadata, held as compressed chunks.
#[derive(Debug, Default, Clone)]
pub(crate) struct VlMetalayers {
    layers: Vec<(String, Vec<u8>)>,
}

impl VlMetalayers {
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn exists(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.exists(name).map(|i| self.layers[i].1.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|(n, _)| n.as_str())
    }

    /// Insert or replace `name` with an already-compressed chunk.
    pub fn set(&mut self, name: &str, chunk: Vec<u8>) -> Result<usize> {
        check_name(name)?;
        if let Some(idx) = self.exists(name) {
            self.layers[idx].1 = chunk;
            return Ok(idx);
        }
        if self.layers.len() >= MAX_VLMETALAYERS {
            return Err(Error::InvalidInput(format!(
                "cannot add more than {MAX_VLMETALAYERS} vlmetalayers"
            )));
        }
        self.layers.push((name.to_string(), chunk));
        Ok(self.layers.len() - 1)
    }

    pub fn delete(&mut self, name: &str) -> Result<usize> {
        let idx = self
            .exists(name)
            .ok_or_else(|| Error::InvalidInput(format!("vlmetalayer {name:?} not found")))?;
        self.layers.remove(idx);
        Ok(self.layers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_get_update() {
        let mut m = Metalayers::new();
        assert_eq!(m.add("shape", &[1, 2, 3]).unwrap(), 0);
        assert_eq!(m.add("scale", &[9]).unwrap(), 1);
        assert_eq!(m.get("shape"), Some(&[1u8, 2, 3][..]));
        m.update("shape", &[4, 5, 6]).unwrap();
        assert_eq!(m.get("shape"), Some(&[4u8, 5, 6][..]));
        assert_eq!(m.names().collect::<Vec<_>>(), vec!["shape", "scale"]);
    }

    #[test]
    fn size_is_fixed_and_names_unique() {
        let mut m = Metalayers::new();
        m.add("shape", &[1, 2, 3]).unwrap();
        assert!(matches!(m.add("shape", &[1]), Err(Error::InvalidInput(_))));
        assert!(matches!(m.update("shape", &[1]), Err(Error::InvalidInput(_))));
        assert!(matches!(m.update("missing", &[1]), Err(Error::InvalidInput(_))));
        assert!(matches!(m.add("", &[1]), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn capacity_is_bounded() {
        let mut m = Metalayers::new();
        for i in 0..MAX_METALAYERS {
            m.add(&format!("m{i}"), &[i as u8]).unwrap();
        }
        assert!(m.add("overflow", &[0]).is_err());
        assert_eq!(m.len(), MAX_METALAYERS);
    }

    #[test]
    fn vlmeta_set_replaces_and_delete_shrinks() {
        let mut vl = VlMetalayers::default();
        vl.set("info", vec![1]).unwrap();
        vl.set("info", vec![2, 2]).unwrap();
        assert_eq!(vl.len(), 1);
        assert_eq!(vl.get("info"), Some(&[2u8, 2][..]));
        assert_eq!(vl.delete("info").unwrap(), 0);
        assert!(vl.delete("info").is_err());
    }
}
