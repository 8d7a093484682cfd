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
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

use byteorder::{ByteOrder, ReadBytesExt, WriteBytesExt};

use crate::bbi::{BbiHeader, IDX_MAGIC};
use crate::bbi_block::{BbiRawBlockEncoder, BbiZoomBlockEncoder};
use crate::utility_io::{compress_slice, file_write_at, uncompress_slice};

/* -------------------------------------------------------------------------- */

// Vertex of the data R-tree. Each child slot carries a bounding box in
// (chromosome index, base position) space. Leaf slots additionally point at
// a data block on disk; the `ptr_*` vectors hold the file positions of the
// offset and size fields so that blocks can be written after the index
#[derive(Debug, Default)]
pub struct RVertex {
    pub is_leaf        : u8,
    pub n_children     : u16,
    pub chr_idx_start  : Vec<u32>,
    pub base_start     : Vec<u32>,
    pub chr_idx_end    : Vec<u32>,
    pub base_end       : Vec<u32>,
    pub data_offset    : Vec<u64>,
    pub sizes          : Vec<u64>,
    pub children       : Vec<Box<RVertex>>,
    pub ptr_data_offset: Vec<u64>,
    pub ptr_sizes      : Vec<u64>,
}

/* -------------------------------------------------------------------------- */

impl RVertex {

    pub fn new_leaf() -> Self {
        RVertex {
            is_leaf: 1,
            ..Default::default()
        }
    }

    // Read the i-th data block of a leaf vertex. The block is uncompressed
    // if compression is enabled for the file
    pub fn read_block<R: Read + Seek>(&self, reader: &mut R, uncompress_buf_size: u32, i: usize) -> io::Result<Vec<u8>> {
        let mut block = vec![0u8; self.sizes[i] as usize];

        reader.seek(SeekFrom::Start(self.data_offset[i]))?;
        reader.read_exact(&mut block)?;

        if uncompress_buf_size != 0 {
            block = uncompress_slice(&block)?;
        }

        Ok(block)
    }

    // Append the i-th data block at the current cursor position and patch
    // the offset and size slots of this vertex. Grows the file-wide
    // uncompressed buffer size if required
    pub fn write_block<E: ByteOrder, W: Write + Seek>(&mut self, writer: &mut W, header: &mut BbiHeader, i: usize, mut block: Vec<u8>) -> io::Result<()> {

        if header.uncompress_buf_size != 0 {
            if block.len() as u32 > header.uncompress_buf_size {
                header.uncompress_buf_size = block.len() as u32;
                header.write_uncompress_buf_size::<E, W>(writer)?;
            }
            block = compress_slice(&block)?;
        }

        self.data_offset[i] = writer.seek(SeekFrom::Current(0))?;
        self.sizes      [i] = block.len() as u64;

        writer.write_all(&block)?;

        let mut buf = [0u8; 8];

        if self.ptr_data_offset[i] != 0 {
            E::write_u64(&mut buf, self.data_offset[i]);
            file_write_at(writer, self.ptr_data_offset[i], &buf)?;
        }
        if self.ptr_sizes[i] != 0 {
            E::write_u64(&mut buf, self.sizes[i]);
            file_write_at(writer, self.ptr_sizes[i], &buf)?;
        }

        Ok(())
    }

    pub fn read<E: ByteOrder, R: Read + Seek>(&mut self, file: &mut R) -> io::Result<()> {

        self.is_leaf = file.read_u8()?;
        file.read_u8()?; // padding
        self.n_children = file.read_u16::<E>()?;

        let n = self.n_children as usize;

        self.chr_idx_start  .resize(n, 0);
        self.base_start     .resize(n, 0);
        self.chr_idx_end    .resize(n, 0);
        self.base_end       .resize(n, 0);
        self.data_offset    .resize(n, 0);
        self.ptr_data_offset.resize(n, 0);

        if self.is_leaf != 0 {
            self.sizes    .resize(n, 0);
            self.ptr_sizes.resize(n, 0);
        }

        for i in 0..n {
            self.chr_idx_start[i] = file.read_u32::<E>()?;
            self.base_start   [i] = file.read_u32::<E>()?;
            self.chr_idx_end  [i] = file.read_u32::<E>()?;
            self.base_end     [i] = file.read_u32::<E>()?;

            self.ptr_data_offset[i] = file.seek(SeekFrom::Current(0))?;
            self.data_offset    [i] = file.read_u64::<E>()?;

            if self.is_leaf != 0 {
                self.ptr_sizes[i] = file.seek(SeekFrom::Current(0))?;
                self.sizes    [i] = file.read_u64::<E>()?;
            }
        }

        if self.is_leaf == 0 {
            for i in 0..n {
                file.seek(SeekFrom::Start(self.data_offset[i]))?;
                let mut child = Box::new(RVertex::default());
                child.read::<E, R>(file)?;
                self.children.push(child);
            }
        }

        Ok(())
    }

    pub fn write<E: ByteOrder, W: Write + Seek>(&mut self, file: &mut W) -> io::Result<()> {

        let n = self.n_children as usize;

        self.data_offset    .resize(n, 0);
        self.ptr_data_offset.resize(n, 0);
        if self.is_leaf != 0 {
            self.sizes    .resize(n, 0);
            self.ptr_sizes.resize(n, 0);
        }

        file.write_u8(self.is_leaf)?;
        file.write_u8(0)?; // padding
        file.write_u16::<E>(self.n_children)?;

        for i in 0..n {
            file.write_u32::<E>(self.chr_idx_start[i])?;
            file.write_u32::<E>(self.base_start   [i])?;
            file.write_u32::<E>(self.chr_idx_end  [i])?;
            file.write_u32::<E>(self.base_end     [i])?;

            self.ptr_data_offset[i] = file.seek(SeekFrom::Current(0))?;
            file.write_u64::<E>(self.data_offset[i])?;

            if self.is_leaf != 0 {
                self.ptr_sizes[i] = file.seek(SeekFrom::Current(0))?;
                file.write_u64::<E>(self.sizes[i])?;
            }
        }

        // children follow their parent; patch the recorded offset slots
        // once the positions are known
        if self.is_leaf == 0 {
            let mut buf = [0u8; 8];

            for i in 0..n {
                self.data_offset[i] = file.seek(SeekFrom::Current(0))?;

                E::write_u64(&mut buf, self.data_offset[i]);
                file_write_at(file, self.ptr_data_offset[i], &buf)?;

                self.children[i].write::<E, W>(file)?;
            }
        }

        Ok(())
    }
}

/* -------------------------------------------------------------------------- */

// Spatial index over data blocks. The bounding box of the whole tree and
// the measured index size are stored in the header; `idx_size` is patched
// after the vertices have been written
#[derive(Debug, Default)]
pub struct RTree {
    pub block_size      : u32,
    pub n_items         : u64,
    pub chr_idx_start   : u32,
    pub base_start      : u32,
    pub chr_idx_end     : u32,
    pub base_end        : u32,
    pub idx_size        : u64,
    pub n_items_per_slot: u32,
    pub root            : Option<Box<RVertex>>,
    pub ptr_idx_size    : u64,
}

/* -------------------------------------------------------------------------- */

impl RTree {

    pub fn new() -> Self {
        RTree {
            block_size      : 256,
            n_items_per_slot: 1024,
            ..Default::default()
        }
    }

    pub fn is_nil(&self) -> bool {
        self.block_size == 0
    }

    pub fn read<E: ByteOrder, R: Read + Seek>(&mut self, file: &mut R) -> io::Result<()> {
        let magic = file.read_u32::<E>()?;
        if magic != IDX_MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid index magic number"));
        }

        self.block_size       = file.read_u32::<E>()?;
        self.n_items          = file.read_u64::<E>()?;
        self.chr_idx_start    = file.read_u32::<E>()?;
        self.base_start       = file.read_u32::<E>()?;
        self.chr_idx_end      = file.read_u32::<E>()?;
        self.base_end         = file.read_u32::<E>()?;
        self.ptr_idx_size     = file.seek(SeekFrom::Current(0))?;
        self.idx_size         = file.read_u64::<E>()?;
        self.n_items_per_slot = file.read_u32::<E>()?;

        file.read_u32::<E>()?; // padding

        let mut root = Box::new(RVertex::default());
        root.read::<E, R>(file)?;
        self.root = Some(root);

        Ok(())
    }

    pub fn write<E: ByteOrder, W: Write + Seek>(&mut self, file: &mut W) -> io::Result<()> {
        let offset_start = file.seek(SeekFrom::Current(0))?;

        file.write_u32::<E>(IDX_MAGIC)?;
        file.write_u32::<E>(self.block_size)?;
        file.write_u64::<E>(self.n_items)?;
        file.write_u32::<E>(self.chr_idx_start)?;
        file.write_u32::<E>(self.base_start)?;
        file.write_u32::<E>(self.chr_idx_end)?;
        file.write_u32::<E>(self.base_end)?;

        self.ptr_idx_size = file.seek(SeekFrom::Current(0))?;
        file.write_u64::<E>(self.idx_size)?;
        file.write_u32::<E>(self.n_items_per_slot)?;

        file.write_u32::<E>(0)?; // padding

        if let Some(ref mut root) = self.root {
            root.write::<E, W>(file)?;
        }

        let offset_end = file.seek(SeekFrom::Current(0))?;
        self.idx_size  = offset_end - offset_start;

        let mut buf = [0u8; 8];
        E::write_u64(&mut buf, self.idx_size);
        file_write_at(file, self.ptr_idx_size, &buf)?;

        Ok(())
    }

    fn build_tree_rec(&self, mut leaves: Vec<Box<RVertex>>, level: usize) -> (Option<Box<RVertex>>, Vec<Box<RVertex>>) {
        let mut v = Box::new(RVertex::default());
        let n = leaves.len();

        if n == 0 {
            return (None, leaves);
        }

        if level == 0 {
            let n = n.min(self.block_size as usize);
            v.n_children = n as u16;
            v.children   = leaves.drain(0..n).collect();
        } else {
            for _ in 0..self.block_size as usize {
                if leaves.is_empty() {
                    break;
                }
                let (vertex, remaining_leaves) = self.build_tree_rec(leaves, level - 1);
                if let Some(vertex) = vertex {
                    v.n_children += 1;
                    v.children.push(vertex);
                }
                leaves = remaining_leaves;
            }
        }

        for child in &v.children {
            v.chr_idx_start.push(child.chr_idx_start[0]);
            v.chr_idx_end  .push(child.chr_idx_end  [child.n_children as usize - 1]);
            v.base_start   .push(child.base_start   [0]);
            v.base_end     .push(child.base_end     [child.n_children as usize - 1]);
        }

        (Some(v), leaves)
    }

    // Assemble the tree bottom-up from pre-populated leaf vertices. Leaves
    // must already be sorted by (chromosome, position); the writer produces
    // them in this order
    pub fn build_tree(&mut self, leaves: Vec<Box<RVertex>>) -> io::Result<()> {
        if leaves.is_empty() {
            return Ok(());
        }

        for w in leaves.windows(2) {
            let (a, b) = (&w[0], &w[1]);

            let a_chr  = a.chr_idx_end[a.n_children as usize - 1];
            let a_base = a.base_end   [a.n_children as usize - 1];

            if b.chr_idx_start[0] < a_chr
                || (b.chr_idx_start[0] == a_chr && b.base_start[0] < a_base)
            {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "leaves are not sorted"));
            }
        }

        self.n_items = leaves.iter().map(|leaf| leaf.n_children as u64).sum();

        if leaves.len() == 1 {
            self.root = Some(leaves.into_iter().next().unwrap());
        } else {
            let depth = ((leaves.len() as f64).ln() / (self.block_size as f64).ln()).ceil() as usize;
            let (root, remaining_leaves) = self.build_tree_rec(leaves, depth - 1);

            if !remaining_leaves.is_empty() {
                return Err(io::Error::new(io::ErrorKind::Other, "internal error while building index"));
            }

            self.root = root;
        }

        if let Some(ref root) = self.root {
            self.chr_idx_start = root.chr_idx_start[0];
            self.chr_idx_end   = root.chr_idx_end  [root.n_children as usize - 1];
            self.base_start    = root.base_start   [0];
            self.base_end      = root.base_end     [root.n_children as usize - 1];
        }

        Ok(())
    }
}

/* -------------------------------------------------------------------------- */

// One overlapping leaf slot found during traversal
pub struct RTreeItem<'a> {
    pub vertex: &'a RVertex,
    pub idx   : usize,
}

struct RTreeTraverserPosition<'a> {
    vertex: &'a RVertex,
    idx   : usize,
}

// Depth-first traversal over all leaf slots whose bounding box overlaps the
// query region. Positions are kept on an explicit stack so that traversal
// can be suspended between results
pub struct RTreeTraverser<'a> {
    chrom_id: u32,
    from    : u32,
    to      : u32,
    stack   : Vec<RTreeTraverserPosition<'a>>,
}

/* -------------------------------------------------------------------------- */

impl<'a> RTreeTraverser<'a> {

    pub fn new(tree: &'a RTree, chrom_id: i32, from: i32, to: i32) -> Self {
        let mut traverser = RTreeTraverser {
            chrom_id: chrom_id as u32,
            from    : from.max(0) as u32,
            to      : to  .max(0) as u32,
            stack   : Vec::new(),
        };
        if let Some(ref root) = tree.root {
            traverser.stack.push(RTreeTraverserPosition { vertex: root, idx: 0 });
        }
        traverser
    }
}

impl<'a> Iterator for RTreeTraverser<'a> {

    type Item = RTreeItem<'a>;

    fn next(&mut self) -> Option<Self::Item> {

        'outer: while let Some(top) = self.stack.pop() {

            let vertex = top.vertex;

            for i in top.idx..vertex.n_children as usize {

                // children are sorted by chromosome; once past the queried
                // chromosome the rest of this vertex cannot overlap
                if vertex.chr_idx_start[i] > self.chrom_id {
                    continue 'outer;
                }
                if self.chrom_id > vertex.chr_idx_end[i] {
                    continue;
                }

                // position check only applies if the box does not span
                // multiple chromosomes
                if vertex.chr_idx_start[i] == vertex.chr_idx_end[i] {
                    if vertex.base_end[i] <= self.from {
                        continue;
                    }
                    if vertex.base_start[i] >= self.to {
                        continue 'outer;
                    }
                }

                self.stack.push(RTreeTraverserPosition { vertex, idx: i + 1 });

                if vertex.is_leaf == 0 {
                    self.stack.push(RTreeTraverserPosition { vertex: &vertex.children[i], idx: 0 });
                    continue 'outer;
                } else {
                    return Some(RTreeItem { vertex, idx: i });
                }
            }
        }
        None
    }
}

/* -------------------------------------------------------------------------- */

pub struct RVertexGeneratorType {
    pub vertex: RVertex,
    pub blocks: Vec<Vec<u8>>,
}

// Encodes one chromosome's samples into leaf vertices and their data
// blocks. Encoding runs on a separate thread; vertices arrive through a
// bounded channel while the consumer writes blocks to disk
pub struct RVertexGenerator {
    pub block_size    : usize,
    pub items_per_slot: usize,
}

/* -------------------------------------------------------------------------- */

impl RVertexGenerator {

    pub fn new(block_size: usize, items_per_slot: usize) -> Result<Self, String> {
        if block_size == 0 {
            return Err(format!("invalid block size `{}`", block_size));
        }
        if items_per_slot == 0 {
            return Err(format!("invalid items per slot `{}`", items_per_slot));
        }
        Ok(RVertexGenerator {
            block_size,
            items_per_slot,
        })
    }

    pub fn generate<E: ByteOrder + 'static>(
        &self,
        chrom_id       : usize,
        sequence       : Vec<f64>,
        bin_size       : usize,
        reduction_level: usize,
        fixed_step     : bool,
    ) -> Receiver<io::Result<RVertexGeneratorType>> {

        let (tx, rx) = sync_channel(100);

        let generator = RVertexGenerator {
            block_size    : self.block_size,
            items_per_slot: self.items_per_slot,
        };

        std::thread::spawn(move || {
            generator.generate_impl::<E>(&tx, chrom_id, &sequence, bin_size, reduction_level, fixed_step);
        });

        rx
    }

    fn generate_impl<E: ByteOrder>(
        &self,
        tx             : &SyncSender<io::Result<RVertexGeneratorType>>,
        chrom_id       : usize,
        sequence       : &[f64],
        bin_size       : usize,
        reduction_level: usize,
        fixed_step     : bool,
    ) {
        if reduction_level > bin_size {
            self.generate_zoom::<E>(tx, chrom_id, sequence, bin_size, reduction_level)
        } else {
            self.generate_raw::<E>(tx, chrom_id, sequence, bin_size, fixed_step)
        }
    }

    fn generate_raw<E: ByteOrder>(
        &self,
        tx        : &SyncSender<io::Result<RVertexGeneratorType>>,
        chrom_id  : usize,
        sequence  : &[f64],
        bin_size  : usize,
        fixed_step: bool,
    ) {
        let encoder = BbiRawBlockEncoder::new(self.items_per_slot, fixed_step);

        let mut vertex = RVertex::new_leaf();
        let mut blocks = Vec::new();

        for item in encoder.encode::<E>(chrom_id as u32, sequence, bin_size) {

            let chunk = match item {
                Ok (chunk) => chunk,
                Err(err)   => { let _ = tx.send(Err(err)); return; }
            };

            if vertex.n_children as usize == self.block_size {
                if tx.send(Ok(RVertexGeneratorType { vertex, blocks })).is_err() {
                    return;
                }
                vertex = RVertex::new_leaf();
                blocks = Vec::new();
            }
            vertex.chr_idx_start  .push(chrom_id   as u32);
            vertex.chr_idx_end    .push(chrom_id   as u32);
            vertex.base_start     .push(chunk.from as u32);
            vertex.base_end       .push(chunk.to   as u32);
            vertex.data_offset    .push(0);
            vertex.sizes          .push(0);
            vertex.ptr_data_offset.push(0);
            vertex.ptr_sizes      .push(0);
            vertex.n_children += 1;

            blocks.push(chunk.block);
        }

        if vertex.n_children != 0 {
            let _ = tx.send(Ok(RVertexGeneratorType { vertex, blocks }));
        }
    }

    fn generate_zoom<E: ByteOrder>(
        &self,
        tx             : &SyncSender<io::Result<RVertexGeneratorType>>,
        chrom_id       : usize,
        sequence       : &[f64],
        bin_size       : usize,
        reduction_level: usize,
    ) {
        let encoder = BbiZoomBlockEncoder::new(self.items_per_slot, reduction_level);

        let mut vertex = RVertex::new_leaf();
        let mut blocks = Vec::new();

        for item in encoder.encode::<E>(chrom_id as u32, sequence, bin_size) {

            let chunk = match item {
                Ok (chunk) => chunk,
                Err(err)   => { let _ = tx.send(Err(err)); return; }
            };

            if vertex.n_children as usize == self.block_size {
                if tx.send(Ok(RVertexGeneratorType { vertex, blocks })).is_err() {
                    return;
                }
                vertex = RVertex::new_leaf();
                blocks = Vec::new();
            }
            vertex.chr_idx_start  .push(chrom_id   as u32);
            vertex.chr_idx_end    .push(chrom_id   as u32);
            vertex.base_start     .push(chunk.from as u32);
            vertex.base_end       .push(chunk.to   as u32);
            vertex.data_offset    .push(0);
            vertex.sizes          .push(0);
            vertex.ptr_data_offset.push(0);
            vertex.ptr_sizes      .push(0);
            vertex.n_children += 1;

            blocks.push(chunk.block);
        }

        if vertex.n_children != 0 {
            let _ = tx.send(Ok(RVertexGeneratorType { vertex, blocks }));
        }
    }
}

/* -------------------------------------------------------------------------- */
/* -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {

    use std::io::{Cursor, Seek, SeekFrom};

    use byteorder::LittleEndian;

    use crate::bbi_rtree::{RTree, RTreeTraverser, RVertex, RVertexGenerator};

    fn leaf(boxes: &[(u32, u32, u32)]) -> Box<RVertex> {
        let mut v = RVertex::new_leaf();
        for &(chrom, from, to) in boxes {
            v.chr_idx_start  .push(chrom);
            v.chr_idx_end    .push(chrom);
            v.base_start     .push(from);
            v.base_end       .push(to);
            v.data_offset    .push(0);
            v.sizes          .push(0);
            v.ptr_data_offset.push(0);
            v.ptr_sizes      .push(0);
            v.n_children += 1;
        }
        Box::new(v)
    }

    #[test]
    fn test_rtree_traverser() {

        let mut tree = RTree::new();

        tree.build_tree(vec![
            leaf(&[(0,   0, 100)]),
            leaf(&[(0, 100, 200)]),
            leaf(&[(1,   0,  50)]),
        ]).unwrap();

        assert_eq!(tree.n_items, 3);
        assert_eq!(tree.chr_idx_start, 0);
        assert_eq!(tree.chr_idx_end  , 1);

        let hits: Vec<(u32, u32)> = RTreeTraverser::new(&tree, 0, 50, 150)
            .map(|r| (r.vertex.base_start[r.idx], r.vertex.base_end[r.idx]))
            .collect();
        assert_eq!(hits, vec![(0, 100), (100, 200)]);

        let hits: Vec<(u32, u32)> = RTreeTraverser::new(&tree, 1, 0, 10)
            .map(|r| (r.vertex.base_start[r.idx], r.vertex.base_end[r.idx]))
            .collect();
        assert_eq!(hits, vec![(0, 50)]);

        let hits: Vec<(u32, u32)> = RTreeTraverser::new(&tree, 2, 0, 10)
            .map(|r| (r.vertex.base_start[r.idx], r.vertex.base_end[r.idx]))
            .collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_rtree_traverser_empty() {

        let tree = RTree::new();

        assert!(RTreeTraverser::new(&tree, 0, 0, 100).next().is_none());
    }

    #[test]
    fn test_rtree_unsorted_leaves() {

        let mut tree = RTree::new();

        let result = tree.build_tree(vec![
            leaf(&[(0, 100, 200)]),
            leaf(&[(0,   0, 100)]),
        ]);

        assert!(result.is_err());
    }

    #[test]
    fn test_rtree_roundtrip() {

        let mut tree = RTree::new();

        let mut l1 = leaf(&[(0,   0, 100), (0, 100, 200)]);
        let mut l2 = leaf(&[(1,   0,  50)]);

        l1.data_offset = vec![1000, 2000];
        l1.sizes       = vec![  10,   20];
        l2.data_offset = vec![3000];
        l2.sizes       = vec![  30];

        tree.build_tree(vec![l1, l2]).unwrap();

        let mut file = Cursor::new(Vec::new());
        tree.write::<LittleEndian, _>(&mut file).unwrap();

        assert_eq!(tree.idx_size, file.get_ref().len() as u64);

        file.seek(SeekFrom::Start(0)).unwrap();

        let mut restored = RTree::default();
        restored.read::<LittleEndian, _>(&mut file).unwrap();

        assert_eq!(restored.block_size      , 256);
        assert_eq!(restored.n_items         ,   3);
        assert_eq!(restored.n_items_per_slot, 1024);
        assert_eq!(restored.chr_idx_start   ,   0);
        assert_eq!(restored.chr_idx_end     ,   1);
        assert_eq!(restored.idx_size        , tree.idx_size);

        let hits: Vec<(u64, u64)> = RTreeTraverser::new(&restored, 0, 0, 200)
            .map(|r| (r.vertex.data_offset[r.idx], r.vertex.sizes[r.idx]))
            .collect();
        assert_eq!(hits, vec![(1000, 10), (2000, 20)]);
    }

    #[test]
    fn test_generator_invalid_parameters() {

        assert!(RVertexGenerator::new(0, 1024).is_err());
        assert!(RVertexGenerator::new(256, 0).is_err());
        assert!(RVertexGenerator::new(256, 1024).is_ok());
    }

    #[test]
    fn test_generator_raw() {

        let generator = RVertexGenerator::new(256, 4).unwrap();

        let sequence: Vec<f64> = (0..16).map(|i| i as f64).collect();

        let mut n_vertices = 0;
        let mut n_blocks   = 0;

        for item in generator.generate::<LittleEndian>(0, sequence, 10, 10, true) {
            let item = item.unwrap();
            n_vertices += 1;
            n_blocks   += item.blocks.len();
            assert_eq!(item.vertex.n_children as usize, item.blocks.len());
        }

        // 16 samples with four items per slot gives four blocks
        assert_eq!(n_vertices, 1);
        assert_eq!(n_blocks  , 4);
    }
}
