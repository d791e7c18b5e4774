use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

pub const MAX_FABRICS: usize = 5;
pub const ROOT_PUBLIC_KEY_SIZE: usize = 65;
const ENCODED_FABRIC_SIZE: usize = 8 + 2 + ROOT_PUBLIC_KEY_SIZE + 4 + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fabric {
    pub fabric_id: u64,
    pub vendor_id: u16,
    pub root_public_key: [u8; ROOT_PUBLIC_KEY_SIZE],
    /// Seconds since unix epoch, truncated.
    pub last_seen: u32,
}

fn now_secs() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

pub struct FabricTable {
    slots: [Option<Fabric>; MAX_FABRICS],
}

impl FabricTable {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    pub fn add_or_update(&mut self, fabric_id: u64, vendor_id: u16, root_key: &[u8]) -> Result<()> {
        if root_key.len() != ROOT_PUBLIC_KEY_SIZE {
            anyhow::bail!(
                "root public key must be {} bytes, got {}",
                ROOT_PUBLIC_KEY_SIZE,
                root_key.len()
            );
        }
        let mut key = [0u8; ROOT_PUBLIC_KEY_SIZE];
        key.copy_from_slice(root_key);
        if let Some(f) = self
            .slots
            .iter_mut()
            .flatten()
            .find(|f| f.fabric_id == fabric_id)
        {
            f.vendor_id = vendor_id;
            f.root_public_key = key;
            f.last_seen = now_secs();
            return Ok(());
        }
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.is_none())
            .context("fabric table full")?;
        *slot = Some(Fabric {
            fabric_id,
            vendor_id,
            root_public_key: key,
            last_seen: now_secs(),
        });
        Ok(())
    }

    /// Returns true when fabric was present.
    pub fn remove(&mut self, fabric_id: u64) -> bool {
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|f| f.fabric_id == fabric_id) {
                *slot = None;
                return true;
            }
        }
        false
    }

    pub fn get(&self, fabric_id: u64) -> Option<&Fabric> {
        self.slots
            .iter()
            .flatten()
            .find(|f| f.fabric_id == fabric_id)
    }

    pub fn count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn clear(&mut self) {
        self.slots = std::array::from_fn(|_| None);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fabric> {
        self.slots.iter().flatten()
    }

    /// count(u8), then per fabric: id u64, vendor u16, root key, last seen u32, active u8
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(1 + MAX_FABRICS * ENCODED_FABRIC_SIZE);
        out.write_u8(self.count() as u8)?;
        for f in self.iter() {
            out.write_u64::<LittleEndian>(f.fabric_id)?;
            out.write_u16::<LittleEndian>(f.vendor_id)?;
            out.extend_from_slice(&f.root_public_key);
            out.write_u32::<LittleEndian>(f.last_seen)?;
            out.write_u8(1)?;
        }
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(data);
        let count = cursor.read_u8().context("empty fabric blob")? as usize;
        if count > MAX_FABRICS {
            anyhow::bail!("fabric blob declares {} fabrics, max is {}", count, MAX_FABRICS);
        }
        let mut table = Self::new();
        for i in 0..count {
            let fabric_id = cursor
                .read_u64::<LittleEndian>()
                .context(format!("fabric {} truncated", i))?;
            let vendor_id = cursor.read_u16::<LittleEndian>()?;
            let mut root_public_key = [0u8; ROOT_PUBLIC_KEY_SIZE];
            std::io::Read::read_exact(&mut cursor, &mut root_public_key)?;
            let last_seen = cursor.read_u32::<LittleEndian>()?;
            let active = cursor.read_u8()?;
            if active == 0 {
                continue;
            }
            table.slots[i] = Some(Fabric {
                fabric_id,
                vendor_id,
                root_public_key,
                last_seen,
            });
        }
        Ok(table)
    }
}

impl Default for FabricTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_and_update() {
        let mut t = FabricTable::new();
        for id in 1..=MAX_FABRICS as u64 {
            t.add_or_update(id, 0xfff1, &[4; 65]).unwrap();
        }
        assert!(t.add_or_update(99, 0xfff1, &[4; 65]).is_err());
        assert_eq!(t.count(), MAX_FABRICS);
        assert!(t.get(99).is_none());

        t.add_or_update(2, 0x1234, &[5; 65]).unwrap();
        assert_eq!(t.count(), MAX_FABRICS);
        assert_eq!(t.get(2).unwrap().vendor_id, 0x1234);
        assert!(t.add_or_update(7, 1, &[4; 64]).is_err());

        assert!(t.remove(3));
        assert!(!t.remove(3));
        t.add_or_update(99, 0xfff1, &[4; 65]).unwrap();
    }

    #[test]
    fn blob_layout() {
        let mut t = FabricTable::new();
        t.add_or_update(0x0102030405060708, 0xfff1, &[4; 65]).unwrap();
        let blob = t.encode().unwrap();
        assert_eq!(blob.len(), 1 + ENCODED_FABRIC_SIZE);
        assert_eq!(blob[0], 1);
        assert_eq!(&blob[1..9], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&blob[9..11], &[0xf1, 0xff]);
        assert_eq!(*blob.last().unwrap(), 1);

        let back = FabricTable::decode(&blob).unwrap();
        assert_eq!(back.get(0x0102030405060708), t.get(0x0102030405060708));

        assert!(FabricTable::decode(&[6]).is_err());
        assert!(FabricTable::decode(&blob[..20]).is_err());
        assert!(FabricTable::decode(&[]).is_err());
    }
}
