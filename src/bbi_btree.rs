/* Copyright (C) 2024 Philipp Benner
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 */

use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{ByteOrder, ReadBytesExt, WriteBytesExt};

use crate::bbi::CIRTREE_MAGIC;
use crate::utility_io::file_write_at;

/* -------------------------------------------------------------------------- */

// Vertex of the on-disk chromosome B-tree. Leaf vertices carry key/value
// pairs, index vertices carry the first key of each child next to the
// child's file offset
struct BVertex {
    is_leaf : u8,
    keys    : Vec<Vec<u8>>,
    values  : Vec<Vec<u8>>,
    children: Vec<BVertex>,
}

/* -------------------------------------------------------------------------- */

impl BVertex {

    fn new() -> Self {
        BVertex {
            is_leaf : 0,
            keys    : Vec::new(),
            values  : Vec::new(),
            children: Vec::new(),
        }
    }

    // Recursively partition data[from..to] into a vertex at the given level.
    // Returns the number of items consumed, which for an index vertex is the
    // sum over its children
    fn build_tree(&mut self, data: &BData, from: usize, to: usize, level: usize) -> Result<usize, String> {

        let mut i = 0;

        if level == 0 {
            self.is_leaf = 1;
            while self.keys.len() < data.items_per_block as usize && from + i < to {
                if data.keys[from + i].len() != data.key_size as usize {
                    return Err(format!("key number `{}` has invalid size", from + i));
                }
                if data.values[from + i].len() != data.value_size as usize {
                    return Err(format!("value number `{}` has invalid size", from + i));
                }
                self.keys  .push(data.keys  [from + i].clone());
                self.values.push(data.values[from + i].clone());
                i += 1;
            }
        } else {
            self.is_leaf = 0;
            while self.children.len() < data.items_per_block as usize && from + i < to {
                self.keys.push(data.keys[from + i].clone());
                let mut child = BVertex::new();
                let j = child.build_tree(data, from + i, to, level - 1)?;
                self.children.push(child);
                i += j;
            }
        }
        Ok(i)
    }

    fn write_leaf<E: ByteOrder, W: Write>(&self, writer: &mut W) -> io::Result<()> {

        let padding = 0u8;
        let n_vals  = self.keys.len() as u16;

        writer.write_u8(self.is_leaf)?;
        writer.write_u8(padding)?;
        writer.write_u16::<E>(n_vals)?;

        for i in 0..self.keys.len() {
            writer.write_all(&self.keys  [i])?;
            writer.write_all(&self.values[i])?;
        }
        Ok(())
    }

    fn write_index<E: ByteOrder, W: Write + Seek>(&self, writer: &mut W) -> io::Result<()> {

        let is_leaf = 0u8;
        let padding = 0u8;
        let n_vals  = self.keys.len() as u16;

        let mut offsets = Vec::new();

        writer.write_u8(is_leaf)?;
        writer.write_u8(padding)?;
        writer.write_u16::<E>(n_vals)?;

        // child offsets are not known yet; write placeholders and record
        // their positions
        for i in 0..self.keys.len() {
            writer .write_all(&self.keys[i])?;
            offsets.push(writer.seek(SeekFrom::Current(0))?);
            writer .write_u64::<E>(0)?;
        }
        for i in 0..self.keys.len() {
            let offset = writer.seek(SeekFrom::Current(0))?;

            let mut buf = [0u8; 8];
            E::write_u64(&mut buf, offset);
            file_write_at(writer, offsets[i], &buf)?;

            self.children[i].write::<E, W>(writer)?;
        }
        Ok(())
    }

    fn write<E: ByteOrder, W: Write + Seek>(&self, writer: &mut W) -> io::Result<()> {
        if self.is_leaf != 0 {
            self.write_leaf::<E, W>(writer)
        } else {
            self.write_index::<E, W>(writer)
        }
    }
}

/* -------------------------------------------------------------------------- */

struct BTree {
    key_size       : u32,
    value_size     : u32,
    items_per_block: u32,
    item_count     : u64,
    root           : BVertex,
}

/* -------------------------------------------------------------------------- */

impl BTree {

    fn new(data: &BData) -> Result<Self, String> {

        if data.items_per_block > u16::MAX as u32 {
            return Err(format!("items per block `{}` exceeds vertex capacity", data.items_per_block));
        }
        if data.item_count > 1 && data.items_per_block < 2 {
            return Err(format!("invalid number of items per block `{}`", data.items_per_block));
        }

        let mut tree = BTree {
            key_size       : data.key_size,
            value_size     : data.value_size,
            items_per_block: data.items_per_block,
            item_count     : data.item_count,
            root           : BVertex::new(),
        };
        if data.item_count <= 1 {
            tree.root.build_tree(data, 0, data.item_count as usize, 0)?;
        } else {
            let d = (data.item_count as f64).log(data.items_per_block as f64).ceil() as usize;
            tree.root.build_tree(data, 0, data.item_count as usize, d - 1)?;
        }
        Ok(tree)
    }

    fn write<E: ByteOrder, W: Write + Seek>(&self, writer: &mut W) -> io::Result<()> {

        writer.write_u32::<E>(CIRTREE_MAGIC)?;
        writer.write_u32::<E>(self.items_per_block)?;
        writer.write_u32::<E>(self.key_size)?;
        writer.write_u32::<E>(self.value_size)?;
        writer.write_u64::<E>(self.item_count)?;
        writer.write_u64::<E>(0)?;

        self.root.write::<E, W>(writer)
    }
}

/* -------------------------------------------------------------------------- */

// Flat key/value view of the chromosome B-tree. Reading flattens all leaf
// vertices in key order; writing builds a tree of the configured fan-out
#[derive(Clone, Debug, Default)]
pub struct BData {
    pub key_size       : u32,
    pub value_size     : u32,
    pub items_per_block: u32,
    pub item_count     : u64,
    pub keys           : Vec<Vec<u8>>,
    pub values         : Vec<Vec<u8>>,
    pub ptr_keys       : Vec<i64>,
    pub ptr_values     : Vec<i64>,
}

/* -------------------------------------------------------------------------- */

impl BData {

    pub fn new() -> Self {
        BData::default()
    }

    // Key and value widths are adopted from the first item; all subsequent
    // items must match
    pub fn add(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), String> {
        if self.keys.is_empty() {
            self.key_size   = key  .len() as u32;
            self.value_size = value.len() as u32;
        }
        if key.len() as u32 != self.key_size {
            return Err("BData.add(): key has invalid length".to_string());
        }
        if value.len() as u32 != self.value_size {
            return Err("BData.add(): value has invalid length".to_string());
        }
        self.keys  .push(key);
        self.values.push(value);
        self.items_per_block += 1;
        self.item_count      += 1;
        Ok(())
    }

    pub fn find(&self, key: &[u8]) -> Option<&[u8]> {
        self.keys.iter()
            .position(|k| k as &[u8] == key)
            .map(|i| &self.values[i] as &[u8])
    }

    fn read_vertex_leaf<E: ByteOrder, R: Read + Seek>(&mut self, file: &mut R) -> io::Result<()> {
        let n_vals = file.read_u16::<E>()?;

        for _ in 0..n_vals {
            let mut key   = vec![0; self.key_size   as usize];
            let mut value = vec![0; self.value_size as usize];

            let ptr_key = file.seek(SeekFrom::Current(0))?;
            file.read_exact(&mut key)?;
            let ptr_value = file.seek(SeekFrom::Current(0))?;
            file.read_exact(&mut value)?;

            self.keys      .push(key);
            self.values    .push(value);
            self.ptr_keys  .push(ptr_key   as i64);
            self.ptr_values.push(ptr_value as i64);
        }
        Ok(())
    }

    fn read_vertex_index<E: ByteOrder, R: Read + Seek>(&mut self, file: &mut R) -> io::Result<()> {
        let n_vals = file.read_u16::<E>()?;

        for _ in 0..n_vals {
            let mut key = vec![0; self.key_size as usize];

            // index vertices store the key before the child offset
            file.read_exact(&mut key)?;
            let position = file.read_u64::<E>()?;

            let current_position = file.seek(SeekFrom::Current(0))?;
            file.seek(SeekFrom::Start(position))?;
            self.read_vertex::<E, R>(file)?;
            file.seek(SeekFrom::Start(current_position))?;
        }
        Ok(())
    }

    fn read_vertex<E: ByteOrder, R: Read + Seek>(&mut self, file: &mut R) -> io::Result<()> {
        let is_leaf = file.read_u8()?;
        file.read_u8()?; // padding

        if is_leaf != 0 {
            self.read_vertex_leaf::<E, R>(file)
        } else {
            self.read_vertex_index::<E, R>(file)
        }
    }

    pub fn read<E: ByteOrder, R: Read + Seek>(&mut self, file: &mut R) -> io::Result<()> {
        let magic = file.read_u32::<E>()?;
        if magic != CIRTREE_MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid tree"));
        }

        self.items_per_block = file.read_u32::<E>()?;
        self.key_size        = file.read_u32::<E>()?;
        self.value_size      = file.read_u32::<E>()?;
        self.item_count      = file.read_u64::<E>()?;

        file.read_u32::<E>()?; // padding
        file.read_u32::<E>()?; // padding

        self.read_vertex::<E, R>(file)
    }

    pub fn write<E: ByteOrder, W: Write + Seek>(&self, file: &mut W) -> io::Result<()> {
        let tree = BTree::new(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        tree.write::<E, W>(file)
    }
}

/* -------------------------------------------------------------------------- */
/* -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {

    use std::io::{Cursor, Seek, SeekFrom};

    use byteorder::LittleEndian;

    use crate::bbi_btree::BData;

    fn key(name: &str, width: usize) -> Vec<u8> {
        let mut k = name.as_bytes().to_vec();
        k.resize(width, 0);
        k
    }

    #[test]
    fn test_btree_single_leaf() {

        let mut data = BData::new();

        data.add(key("chr1", 4), vec![0, 0, 0, 1]).unwrap();
        data.add(key("chr2", 4), vec![0, 0, 0, 2]).unwrap();
        data.add(key("chr3", 4), vec![0, 0, 0, 3]).unwrap();

        let mut file = Cursor::new(Vec::new());
        data.write::<LittleEndian, _>(&mut file).unwrap();

        file.seek(SeekFrom::Start(0)).unwrap();

        let mut restored = BData::new();
        restored.read::<LittleEndian, _>(&mut file).unwrap();

        assert_eq!(restored.item_count, 3);
        assert_eq!(restored.key_size  , 4);
        assert_eq!(restored.value_size, 4);
        assert_eq!(restored.keys  , data.keys);
        assert_eq!(restored.values, data.values);
    }

    #[test]
    fn test_btree_multi_level() {

        // fan-out two with five items forces two index levels
        let mut data = BData::new();
        for i in 0..5u8 {
            data.add(key(&format!("chr{}", i), 5), vec![i; 3]).unwrap();
        }
        data.items_per_block = 2;

        let mut file = Cursor::new(Vec::new());
        data.write::<LittleEndian, _>(&mut file).unwrap();

        file.seek(SeekFrom::Start(0)).unwrap();

        let mut restored = BData::new();
        restored.read::<LittleEndian, _>(&mut file).unwrap();

        assert_eq!(restored.item_count, 5);
        assert_eq!(restored.keys  , data.keys);
        assert_eq!(restored.values, data.values);
    }

    #[test]
    fn test_btree_find() {

        let mut data = BData::new();

        data.add(key("chrX", 4), vec![0, 0, 0, 7]).unwrap();
        data.add(key("chrY", 4), vec![0, 0, 0, 8]).unwrap();

        assert_eq!(data.find(&key("chrY", 4)), Some(&[0, 0, 0, 8][..]));
        assert_eq!(data.find(&key("chrZ", 4)), None);
    }

    #[test]
    fn test_btree_width_mismatch() {

        let mut data = BData::new();

        data.add(vec![1, 2, 3], vec![4, 5]).unwrap();

        assert!(data.add(vec![1, 2]      , vec![4, 5]).is_err());
        assert!(data.add(vec![1, 2, 3]   , vec![4]   ).is_err());
        assert!(data.add(vec![6, 7, 8]   , vec![9, 0]).is_ok());
    }
}
