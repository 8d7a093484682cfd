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

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::mem;

use async_stream::stream;
use futures::executor::{block_on_stream, BlockingStream};
use futures::pin_mut;
use futures::StreamExt;
use futures_core::stream::Stream;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::bbi::{
    BbiFile, BbiHeader, BbiHeaderZoom, BbiQueryType,
    BBI_MAX_ZOOM_LEVELS, BBI_RES_INCREMENT,
};
use crate::bbi_block::BbiRawBlockDecoder;
use crate::bbi_btree::BData;
use crate::bbi_rtree::{RTree, RTreeTraverser, RVertex, RVertexGenerator};
use crate::bin_statistics::BinSummaryStatistics;
use crate::error::Error;
use crate::genome::Genome;
use crate::netfile::NetFile;

/* -------------------------------------------------------------------------- */

pub const BIGWIG_MAGIC: u32 = 0x888FFC26;

/* -------------------------------------------------------------------------- */

#[derive(Clone, Debug)]
pub struct BigWigParameters {
    pub block_size      : usize,
    pub items_per_slot  : usize,
    pub reduction_levels: Option<Vec<i32>>,
}

/* -------------------------------------------------------------------------- */

impl Default for BigWigParameters {
    fn default() -> Self {
        BigWigParameters {
            block_size      : 256,
            items_per_slot  : 1024,
            reduction_levels: None,
        }
    }
}

/* -------------------------------------------------------------------------- */

// Compute a default set of zoom levels for the given genome: the coarsest
// reduction still has more than items_per_slot windows on the longest
// chromosome
pub fn default_reduction_levels(genome: &Genome, bin_size: usize, items_per_slot: usize) -> Vec<i32> {

    let c = (BBI_RES_INCREMENT as usize) * bin_size;

    let mut levels = Vec::new();

    // number of bins on the longest chromosome
    let mut l = 0;
    for &length in &genome.lengths {
        if length / bin_size > l {
            l = length / bin_size;
        }
    }

    let mut r = std::cmp::max(100, c);

    while levels.len() < BBI_MAX_ZOOM_LEVELS {
        if l / r > items_per_slot {
            levels.push(r as i32);
            r *= c;
        } else {
            break;
        }
    }

    levels
}

/* -------------------------------------------------------------------------- */

#[derive(Clone, Copy, PartialEq)]
enum BigWigOrder {
    LE,
    BE,
}

/* -------------------------------------------------------------------------- */

// Malformed on-disk data surfaces as InvalidData while parsing; translate
// it to a format error at the crate boundary
fn format_error(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::InvalidData {
        Error::Format(err.to_string())
    } else {
        Error::IO(err)
    }
}

/* -------------------------------------------------------------------------- */

pub struct BigWigReader<R: Read + Seek> {
    reader: R,
    bwf   : BbiFile,
    genome: Genome,
    order : BigWigOrder,
}

/* -------------------------------------------------------------------------- */

pub type BigWigFile = BigWigReader<NetFile>;

/* -------------------------------------------------------------------------- */

impl BigWigFile {

    pub fn open(filename: &str) -> Result<Self, Error> {

        let file = NetFile::open(filename)?;

        BigWigReader::new(file)
    }
}

/* -------------------------------------------------------------------------- */

impl<R: Read + Seek> BigWigReader<R> {

    pub fn new(mut reader: R) -> Result<Self, Error> {
        let (bwf, order) = BigWigReader::<R>::open_bwf(&mut reader).map_err(format_error)?;

        let r = BigWigReader {
            reader,
            bwf,
            genome: Genome::default(),
            order,
        };

        match r.order {
            BigWigOrder::LE => r.initialize::<LittleEndian>().map_err(format_error),
            BigWigOrder::BE => r.initialize::<BigEndian   >().map_err(format_error),
        }
    }

    // Probe the byte order: try little endian first and fall back to big
    // endian if only the magic number did not match
    fn open_bwf(reader: &mut R) -> io::Result<(BbiFile, BigWigOrder)> {

        let mut bwf = BbiFile::default();

        reader.seek(SeekFrom::Start(0))?;

        match bwf.open::<LittleEndian, R>(reader, BIGWIG_MAGIC) {
            Ok(()) => {
                return Ok((bwf, BigWigOrder::LE));
            }
            Err(err) => {
                if err.kind() != io::ErrorKind::InvalidData || err.to_string() != "invalid magic number" {
                    return Err(err);
                }
            }
        }

        reader.seek(SeekFrom::Start(0))?;

        bwf.open::<BigEndian, R>(reader, BIGWIG_MAGIC)?;

        Ok((bwf, BigWigOrder::BE))
    }

    // Decode the chromosome B-tree into a genome: values are pairs of
    // chromosome index and chromosome length
    fn initialize<E: ByteOrder>(mut self) -> io::Result<Self> {

        self.genome.seqnames = vec![String::new(); self.bwf.chrom_data.keys.len()];
        self.genome.lengths  = vec![0; self.bwf.chrom_data.keys.len()];

        for i in 0..self.bwf.chrom_data.keys.len() {
            if self.bwf.chrom_data.values[i].len() != 8 {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid chromosome list"));
            }

            let idx = (&self.bwf.chrom_data.values[i][0..4]).read_u32::<E>()? as usize;

            if idx >= self.bwf.chrom_data.keys.len() {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid chromosome index"));
            }
            self.genome.seqnames[idx] = String::from_utf8_lossy(&self.bwf.chrom_data.keys[i])
                .trim_end_matches('\x00')
                .to_string();
            self.genome.lengths [idx] = (&self.bwf.chrom_data.values[i][4..8]).read_u32::<E>()? as usize;
        }

        Ok(self)
    }

    pub fn genome(&self) -> &Genome {
        &self.genome
    }

    pub fn header(&self) -> &BbiHeader {
        &self.bwf.header
    }

    // Query all sequences matching the given regular expression. Results
    // are produced lazily; bin_size zero returns raw records
    pub fn query_stream<'a>(
        &'a mut self,
        seq_regex: &'a str,
        from     : usize,
        to       : usize,
        bin_size : usize,
    ) -> impl Stream<Item = io::Result<BbiQueryType>> + 'a {

        stream! {

            let re = match regex::Regex::new(&format!("^{}$", seq_regex)) {
                Ok (re) => re,
                Err(_)  => {
                    yield Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid sequence name regex"));
                    return;
                }
            };

            let n = self.genome.seqnames.len();

            for idx in 0..n {
                if !re.is_match(&self.genome.seqnames[idx]) {
                    continue;
                }
                match self.order {
                    BigWigOrder::LE => {
                        let iterator = self.bwf.query_stream::<LittleEndian, R>(
                            &mut self.reader, idx as i32, from as i32, to as i32, bin_size as i32);
                        pin_mut!(iterator);
                        while let Some(item) = iterator.next().await {
                            yield item;
                        }
                    }
                    BigWigOrder::BE => {
                        let iterator = self.bwf.query_stream::<BigEndian, R>(
                            &mut self.reader, idx as i32, from as i32, to as i32, bin_size as i32);
                        pin_mut!(iterator);
                        while let Some(item) = iterator.next().await {
                            yield item;
                        }
                    }
                }
            }
        }
    }

    pub fn query<'a>(
        &'a mut self,
        seq_regex: &'a str,
        from     : usize,
        to       : usize,
        bin_size : usize,
    ) -> BlockingStream<impl Stream<Item = io::Result<BbiQueryType>> + 'a> {

        let s = Box::pin(self.query_stream(seq_regex, from, to, bin_size));

        block_on_stream(s)
    }

    // Determine the bin size the file was written with by inspecting the
    // header of the first data block
    pub fn get_bin_size(&mut self) -> io::Result<usize> {

        if self.bwf.index.is_nil() {
            match self.order {
                BigWigOrder::LE => self.bwf.read_index::<LittleEndian, R>(&mut self.reader)?,
                BigWigOrder::BE => self.bwf.read_index::<BigEndian   , R>(&mut self.reader)?,
            }
        }

        let uncompress_buf_size = self.bwf.header.uncompress_buf_size;

        let chrom = self.bwf.index.chr_idx_start as i32;
        let from  = self.bwf.index.base_start    as i32;

        let mut traverser = RTreeTraverser::new(&self.bwf.index, chrom, from, from + 1);

        match traverser.next() {
            None => Err(io::Error::new(io::ErrorKind::InvalidData, "cannot determine bin size of an empty file")),
            Some(r) => {
                let block = r.vertex.read_block(&mut self.reader, uncompress_buf_size, r.idx)?;
                let span  = match self.order {
                    BigWigOrder::LE => BbiRawBlockDecoder::new::<LittleEndian>(&block)?.header().span,
                    BigWigOrder::BE => BbiRawBlockDecoder::new::<BigEndian   >(&block)?.header().span,
                };
                Ok(span as usize)
            }
        }
    }

    // Retrieve one full sequence as a vector of binned values. Bins without
    // data keep the given init value; f reduces each summary record to a
    // single value. Returns the vector together with the bin size used
    pub fn query_sequence(
        &mut self,
        seqname : &str,
        f       : BinSummaryStatistics,
        bin_size: usize,
        init    : f64,
    ) -> Result<(Vec<f64>, usize), Error> {

        let bin_size = if bin_size == 0 {
            self.get_bin_size()?
        } else {
            bin_size
        };

        let length = self.genome.seq_length(seqname).map_err(Error::NotFound)?;

        let n_bins = (length + bin_size - 1) / bin_size;

        let mut sequence = vec![init; n_bins];

        let pattern = regex::escape(seqname);

        for item in self.query(&pattern, 0, length, bin_size) {
            let r = item?;

            if r.data.statistics.valid > 0.0 {
                let value = f(
                    r.data.statistics.sum,
                    r.data.statistics.sum_squares,
                    r.data.statistics.min,
                    r.data.statistics.max,
                    r.data.statistics.valid,
                );
                for i in (r.data.from..r.data.to).step_by(bin_size) {
                    let j = i as usize / bin_size;
                    if j < sequence.len() {
                        sequence[j] = value;
                    }
                }
            }
        }

        Ok((sequence, bin_size))
    }
}

/* -------------------------------------------------------------------------- */

// Writes a BigWig file in several passes: raw data for all sequences, the
// data index, then per zoom level the reduced data and its index. All
// forward references in the header are patched in close(). Output is
// always little endian
pub struct BigWigWriter<W: Write + Seek> {
    writer          : W,
    bwf             : BbiFile,
    genome          : Genome,
    parameters      : BigWigParameters,
    reduction_levels: Vec<i32>,
    generator       : RVertexGenerator,
    leaves          : Vec<Box<RVertex>>,
    leaves_zoom     : Vec<Vec<Box<RVertex>>>,
}

/* -------------------------------------------------------------------------- */

// A sequence is stored fixed-step unless at least half of its samples
// are NaN
fn use_fixed_step(sequence: &[f64]) -> bool {
    let n_nan = sequence.iter().filter(|x| x.is_nan()).count();

    2 * n_nan < sequence.len()
}

/* -------------------------------------------------------------------------- */

impl BigWigWriter<File> {

    pub fn create(filename: &str, genome: Genome, parameters: BigWigParameters) -> Result<Self, Error> {
        let file = File::create(filename)?;

        BigWigWriter::new(file, genome, parameters)
    }
}

/* -------------------------------------------------------------------------- */

impl<W: Write + Seek> BigWigWriter<W> {

    pub fn new(mut writer: W, genome: Genome, parameters: BigWigParameters) -> Result<Self, Error> {

        let reduction_levels = parameters.reduction_levels.clone().unwrap_or_default();

        let generator = RVertexGenerator::new(parameters.block_size, parameters.items_per_slot)?;

        let mut bwf = BbiFile::new();

        bwf.header.magic       = BIGWIG_MAGIC;
        bwf.header.zoom_levels = reduction_levels.len() as u16;
        // enable compression; the buffer size grows as blocks are written
        bwf.header.uncompress_buf_size = 1;

        for &reduction_level in &reduction_levels {
            bwf.header.zoom_headers.push(BbiHeaderZoom {
                reduction_level: reduction_level as u32,
                ..Default::default()
            });
        }
        bwf.index_zoom = (0..reduction_levels.len()).map(|_| RTree::default()).collect();

        bwf.header.write::<LittleEndian, W>(&mut writer)?;

        // chromosome B-tree with NUL-padded names as keys and pairs of
        // chromosome index and length as values
        bwf.header.ct_offset = writer.seek(SeekFrom::Current(0))?;

        let max_name_length = genome.seqnames.iter().map(|name| name.len()).max().unwrap_or(0);

        let mut chrom_data = BData::new();

        for (i, name) in genome.seqnames.iter().enumerate() {
            let mut key = name.as_bytes().to_vec();
            key.resize(max_name_length, 0);

            let mut value = Vec::with_capacity(8);
            value.write_u32::<LittleEndian>(i as u32)?;
            value.write_u32::<LittleEndian>(genome.lengths[i] as u32)?;

            chrom_data.add(key, value)?;
        }
        chrom_data.write::<LittleEndian, W>(&mut writer)?;
        bwf.chrom_data = chrom_data;

        // data section, starting with a placeholder for the block count
        bwf.header.data_offset = writer.seek(SeekFrom::Current(0))?;
        writer.write_u64::<LittleEndian>(0)?;

        let leaves_zoom = (0..reduction_levels.len()).map(|_| Vec::new()).collect();

        Ok(BigWigWriter {
            writer,
            bwf,
            genome,
            parameters,
            reduction_levels,
            generator,
            leaves     : Vec::new(),
            leaves_zoom,
        })
    }

    pub fn parameters(&self) -> &BigWigParameters {
        &self.parameters
    }

    pub fn reduction_levels(&self) -> &[i32] {
        &self.reduction_levels
    }

    // Write the raw data blocks for one sequence and update the file
    // summary
    pub fn write(&mut self, name: &str, sequence: &[f64], bin_size: usize) -> Result<(), Error> {

        let idx = self.genome.get_idx(name)
            .ok_or_else(|| Error::NotFound(format!("sequence `{}` not found in genome", name)))?;

        let fixed_step = use_fixed_step(sequence);

        for item in self.generator.generate::<LittleEndian>(idx, sequence.to_vec(), bin_size, 0, fixed_step) {
            let item = item?;

            let mut vertex = item.vertex;

            for (i, block) in item.blocks.into_iter().enumerate() {
                vertex.write_block::<LittleEndian, W>(&mut self.writer, &mut self.bwf.header, i, block)?;
            }
            self.bwf.header.n_blocks += vertex.n_children as u64;
            self.leaves.push(Box::new(vertex));
        }

        for &value in sequence {
            self.bwf.header.summary_add_value(value, bin_size);
        }

        Ok(())
    }

    // Build and write the data index from all leaves collected so far
    pub fn write_index(&mut self) -> Result<(), Error> {

        let mut tree = RTree::new();

        tree.block_size       = self.parameters.block_size     as u32;
        tree.n_items_per_slot = self.parameters.items_per_slot as u32;

        tree.build_tree(mem::take(&mut self.leaves))?;

        self.bwf.header.index_offset = self.writer.seek(SeekFrom::Current(0))?;

        tree.write::<LittleEndian, W>(&mut self.writer)?;

        self.bwf.index = tree;

        Ok(())
    }

    // Open the data section of zoom level i, starting with a placeholder
    // for the block count
    pub fn start_zoom_data(&mut self, i: usize) -> Result<(), Error> {

        self.bwf.header.zoom_headers[i].data_offset = self.writer.seek(SeekFrom::Current(0))?;
        self.writer.write_u32::<LittleEndian>(0)?;

        self.leaves_zoom[i].clear();

        Ok(())
    }

    pub fn write_zoom(&mut self, name: &str, sequence: &[f64], bin_size: usize, reduction_level: usize, i: usize) -> Result<(), Error> {

        let idx = self.genome.get_idx(name)
            .ok_or_else(|| Error::NotFound(format!("sequence `{}` not found in genome", name)))?;

        for item in self.generator.generate::<LittleEndian>(idx, sequence.to_vec(), bin_size, reduction_level, true) {
            let item = item?;

            let mut vertex = item.vertex;

            for (j, block) in item.blocks.into_iter().enumerate() {
                vertex.write_block::<LittleEndian, W>(&mut self.writer, &mut self.bwf.header, j, block)?;
            }
            self.bwf.header.zoom_headers[i].n_blocks += vertex.n_children as u32;
            self.leaves_zoom[i].push(Box::new(vertex));
        }

        Ok(())
    }

    pub fn write_index_zoom(&mut self, i: usize) -> Result<(), Error> {

        let mut tree = RTree::new();

        tree.block_size       = self.parameters.block_size     as u32;
        tree.n_items_per_slot = self.parameters.items_per_slot as u32;

        tree.build_tree(mem::take(&mut self.leaves_zoom[i]))?;

        self.bwf.header.zoom_headers[i].index_offset = self.writer.seek(SeekFrom::Current(0))?;

        tree.write::<LittleEndian, W>(&mut self.writer)?;

        self.bwf.index_zoom[i] = tree;

        Ok(())
    }

    // Append the file summary and patch all forward references recorded
    // while writing
    pub fn close(&mut self) -> Result<(), Error> {

        self.bwf.header.write_summary            ::<LittleEndian, W>(&mut self.writer)?;
        self.bwf.header.write_offsets            ::<LittleEndian, W>(&mut self.writer)?;
        self.bwf.header.write_uncompress_buf_size::<LittleEndian, W>(&mut self.writer)?;
        self.bwf.header.write_n_blocks           ::<LittleEndian, W>(&mut self.writer)?;

        for zoom_header in &self.bwf.header.zoom_headers {
            zoom_header.write_offsets ::<LittleEndian, W>(&mut self.writer)?;
            zoom_header.write_n_blocks::<LittleEndian, W>(&mut self.writer)?;
        }

        self.writer.flush()?;

        Ok(())
    }
}

/* -------------------------------------------------------------------------- */
/* -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {

    use std::io::{Cursor, Seek, SeekFrom};

    use crate::bbi::BBI_MAX_ZOOM_LEVELS;
    use crate::bigwig::{default_reduction_levels, BigWigParameters, BigWigReader, BigWigWriter};
    use crate::error::Error;
    use crate::genome::Genome;

    fn write_test_file(reduction_levels: Vec<i32>) -> Cursor<Vec<u8>> {

        let nan = f64::NAN;

        let seq_1 = vec![0.0,0.0,0.0,nan,4.5,5.6,0.0,7.8,8.9,0.0];
        let seq_2 = vec![0.1,1.2,2.3,3.4,4.5,5.6,0.0,0.0,8.9,9.0,
                         0.1,1.2,2.3,3.4,4.5,5.6,6.7,7.8,8.9,9.0];
        let seq_3 = vec![nan,nan,nan,nan,4.5,5.6,nan,nan,nan,nan];

        let sequences = [seq_1, seq_2, seq_3];
        let seqnames: Vec<String> = vec!["test1", "test2", "test3"].into_iter().map(|x| x.to_string()).collect();
        let genome = Genome::new(seqnames.clone(), vec![100, 200, 100]);

        let parameters = BigWigParameters {
            reduction_levels: Some(reduction_levels),
            ..Default::default()
        };

        let mut file = Cursor::new(Vec::new());

        let mut bww = BigWigWriter::new(&mut file, genome, parameters).unwrap();

        for (name, sequence) in seqnames.iter().zip(sequences.iter()) {
            bww.write(name, sequence, 10).unwrap();
        }
        bww.write_index().unwrap();

        let levels = bww.reduction_levels().to_vec();

        for (i, &reduction_level) in levels.iter().enumerate() {
            bww.start_zoom_data(i).unwrap();
            for (name, sequence) in seqnames.iter().zip(sequences.iter()) {
                bww.write_zoom(name, sequence, 10, reduction_level as usize, i).unwrap();
            }
            bww.write_index_zoom(i).unwrap();
        }
        bww.close().unwrap();

        drop(bww);

        file.seek(SeekFrom::Start(0)).unwrap();
        file
    }

    #[test]
    fn test_bigwig_roundtrip() {

        let file = write_test_file(vec![20]);

        let mut bw = BigWigReader::new(file).unwrap();

        assert_eq!(bw.genome().len(), 3);
        assert_eq!(bw.genome().seqnames, vec!["test1", "test2", "test3"]);
        assert_eq!(bw.genome().lengths , vec![100, 200, 100]);

        assert_eq!(bw.query("test1", 0, 100, 10).count(),  9);
        assert_eq!(bw.query("test2", 0, 200, 10).count(), 20);
        assert_eq!(bw.query("test3", 0, 100, 10).count(),  2);

        // fixed step records
        for item in bw.query("test1", 0, 100, 10) {
            let result = item.unwrap();
            assert_eq!(result.data_type, 3);
        }
        // variable step records
        for item in bw.query("test3", 0, 100, 10) {
            let result = item.unwrap();
            assert_eq!(result.data_type, 2);
        }
    }

    #[test]
    fn test_bigwig_zoom_query() {

        let file = write_test_file(vec![20]);

        let mut bw = BigWigReader::new(file).unwrap();

        // bin size 20 is served from the zoom level
        let results: Vec<_> = bw.query("test1", 0, 100, 20)
            .map(|item| item.unwrap())
            .collect();

        assert_eq!(results.len(), 3);

        for result in &results {
            assert_eq!(result.data_type, 1);
        }
        assert_eq!(results[0].data.from, 40);
        assert_eq!(results[0].data.to  , 60);
        assert_eq!(results[2].data.from, 80);
        assert_eq!(results[2].data.to  , 100);
    }

    #[test]
    fn test_bigwig_invalid_bin_size() {

        let file = write_test_file(vec![20]);

        let mut bw = BigWigReader::new(file).unwrap();

        // 15 is neither a multiple of the native bin size nor of a
        // reduction level
        let result: Vec<_> = bw.query("test1", 0, 100, 15).collect();

        assert!(result.iter().any(|item| item.is_err()));
    }

    #[test]
    fn test_bigwig_get_bin_size() {

        let file = write_test_file(vec![20]);

        let mut bw = BigWigReader::new(file).unwrap();

        assert_eq!(bw.get_bin_size().unwrap(), 10);
    }

    #[test]
    fn test_default_reduction_levels() {

        let genome = Genome::new(
            vec!["chr1".to_string()],
            vec![10_000_000],
        );

        let levels = default_reduction_levels(&genome, 10, 1024);

        assert!(!levels.is_empty());
        assert_eq!(levels[0], 100);

        // levels increase by a factor of four times the bin size
        for w in levels.windows(2) {
            assert_eq!(w[1], w[0] * 40);
        }

        // small genomes need no zoom levels
        let genome = Genome::new(vec!["chr1".to_string()], vec![100]);
        assert!(default_reduction_levels(&genome, 10, 1024).is_empty());
    }

    #[test]
    fn test_default_reduction_levels_cap() {

        // a sequence long enough to support more levels than the format
        // allows
        let genome = Genome::new(
            vec!["chr1".to_string()],
            vec![1_000_000_000_000_000],
        );

        let levels = default_reduction_levels(&genome, 1, 1);

        assert_eq!(levels.len(), BBI_MAX_ZOOM_LEVELS);
    }

    #[test]
    fn test_open_invalid_magic() {

        let file = Cursor::new(vec![0u8; 64]);

        let err = BigWigReader::new(file).err().unwrap();

        match err {
            Error::Format(msg) => assert!(msg.contains("magic number")),
            other              => panic!("unexpected error: {}", other),
        }
    }
}
