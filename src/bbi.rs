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

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{ByteOrder, ReadBytesExt, WriteBytesExt};

use async_stream::stream;
use futures::future::Either;
use futures::executor::{block_on_stream, BlockingStream};
use futures_core::stream::Stream;

use crate::bbi_block::{BbiRawBlockDecoder, BbiZoomBlockDecoder};
use crate::bbi_btree::BData;
use crate::bbi_rtree::{RTree, RTreeTraverser};
use crate::utility_io::{file_read_at, file_write_at};

/* -------------------------------------------------------------------------- */

pub const CIRTREE_MAGIC      : u32   = 0x78ca8c91;
pub const IDX_MAGIC          : u32   = 0x2468ace0;
pub const BBI_MAX_ZOOM_LEVELS: usize = 10;
pub const BBI_RES_INCREMENT  : u32   = 4;
pub const BBI_TYPE_FIXED     : u8    = 3;
pub const BBI_TYPE_VARIABLE  : u8    = 2;
pub const BBI_TYPE_BED_GRAPH : u8    = 1;

/* -------------------------------------------------------------------------- */

// One aggregate per reduction-window instance, stored as a fixed 32-byte
// record in zoom data blocks. Statistics are f32 on disk even though all
// in-memory summary math is done in f64
#[derive(Clone, Copy, Default, Debug)]
pub struct BbiZoomRecord {
    pub chrom_id   : u32,
    pub start      : u32,
    pub end        : u32,
    pub valid      : u32,
    pub min        : f32,
    pub max        : f32,
    pub sum        : f32,
    pub sum_squares: f32,
}

/* -------------------------------------------------------------------------- */

impl BbiZoomRecord {

    pub const LENGTH : usize = 32;

    pub fn add_value(&mut self, x: f64) {
        if x.is_nan() {
            return;
        }
        if self.min.is_nan() || self.min > x as f32 {
            self.min = x as f32;
        }
        if self.max.is_nan() || self.max < x as f32 {
            self.max = x as f32;
        }
        self.valid       += 1;
        self.sum         += x as f32;
        self.sum_squares += (x * x) as f32;
    }

    pub fn read_buffer<E: ByteOrder>(&mut self, buffer: &[u8]) {
        self.chrom_id    = E::read_u32(&buffer[ 0.. 4]);
        self.start       = E::read_u32(&buffer[ 4.. 8]);
        self.end         = E::read_u32(&buffer[ 8..12]);
        self.valid       = E::read_u32(&buffer[12..16]);
        self.min         = f32::from_bits(E::read_u32(&buffer[16..20]));
        self.max         = f32::from_bits(E::read_u32(&buffer[20..24]));
        self.sum         = f32::from_bits(E::read_u32(&buffer[24..28]));
        self.sum_squares = f32::from_bits(E::read_u32(&buffer[28..32]));
    }

    pub fn write<E: ByteOrder, T: Write>(&self, writer: &mut T) -> io::Result<()> {
        writer.write_u32::<E>(self.chrom_id)?;
        writer.write_u32::<E>(self.start)?;
        writer.write_u32::<E>(self.end)?;
        writer.write_u32::<E>(self.valid)?;
        writer.write_f32::<E>(self.min)?;
        writer.write_f32::<E>(self.max)?;
        writer.write_f32::<E>(self.sum)?;
        writer.write_f32::<E>(self.sum_squares)?;
        Ok(())
    }
}

/* -------------------------------------------------------------------------- */

#[derive(Clone, Debug)]
pub struct BbiSummaryStatistics {
    pub valid      : f64,
    pub min        : f64,
    pub max        : f64,
    pub sum        : f64,
    pub sum_squares: f64,
}

/* -------------------------------------------------------------------------- */

impl BbiSummaryStatistics {

    pub fn new() -> Self {
        BbiSummaryStatistics {
            valid      : 0.0,
            min        : f64::INFINITY,
            max        : f64::NEG_INFINITY,
            sum        : 0.0,
            sum_squares: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.valid       = 0.0;
        self.min         = f64::INFINITY;
        self.max         = f64::NEG_INFINITY;
        self.sum         = 0.0;
        self.sum_squares = 0.0;
    }

    pub fn add_value(&mut self, x: f64) {
        if x.is_nan() {
            return;
        }
        self.valid       += 1.0;
        self.min          = self.min.min(x);
        self.max          = self.max.max(x);
        self.sum         += x;
        self.sum_squares += x * x;
    }

    // Merging empty statistics must not perturb min/max
    pub fn add(&mut self, other: &BbiSummaryStatistics) {
        if other.valid == 0.0 {
            return;
        }
        self.valid       += other.valid;
        self.min          = self.min.min(other.min);
        self.max          = self.max.max(other.max);
        self.sum         += other.sum;
        self.sum_squares += other.sum_squares;
    }
}

impl Default for BbiSummaryStatistics {
    fn default() -> Self {
        BbiSummaryStatistics::new()
    }
}

/* -------------------------------------------------------------------------- */

// Query-result unit: summary statistics over a genomic interval. A chrom_id
// of -1 marks an empty record
#[derive(Clone, Debug)]
pub struct BbiSummaryRecord {
    pub chrom_id  : i32,
    pub from      : i32,
    pub to        : i32,
    pub statistics: BbiSummaryStatistics,
}

/* -------------------------------------------------------------------------- */

impl BbiSummaryRecord {

    pub fn new() -> BbiSummaryRecord {
        BbiSummaryRecord {
            chrom_id  : -1,
            from      :  0,
            to        :  0,
            statistics: BbiSummaryStatistics::new(),
        }
    }

    pub fn reset(&mut self) {
        self.chrom_id = -1;
        self.from     =  0;
        self.to       =  0;
        self.statistics.reset();
    }

    // Merge a subsequent record into this one. A gap between the two records
    // is counted as zero-valued coverage
    pub fn add_record(&mut self, other: &BbiSummaryRecord) {
        if self.chrom_id == -1 {
            self.chrom_id = other.chrom_id;
            self.from     = other.from;
            self.to       = other.to;
        }
        if self.to < other.from {
            self.statistics.valid += (other.from - self.to) as f64;
            if self.statistics.min > 0.0 {
                self.statistics.min = 0.0;
            }
            if self.statistics.max < 0.0 {
                self.statistics.max = 0.0;
            }
        }
        self.to = other.to;
        self.statistics.add(&other.statistics);
    }
}

impl Default for BbiSummaryRecord {
    fn default() -> Self {
        BbiSummaryRecord::new()
    }
}

impl fmt::Display for BbiSummaryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(chrom_id={}, from={}, to={}, valid={}, min={}, max={}, sum={})",
            self.chrom_id, self.from, self.to,
            self.statistics.valid, self.statistics.min, self.statistics.max, self.statistics.sum)
    }
}

/* -------------------------------------------------------------------------- */

// 24-byte header preceding every raw data block
#[derive(Clone, Debug)]
pub struct BbiDataHeader {
    pub chrom_id  : u32,
    pub start     : u32,
    pub end       : u32,
    pub step      : u32,
    pub span      : u32,
    pub kind      : u8,
    pub reserved  : u8,
    pub item_count: u16,
}

/* -------------------------------------------------------------------------- */

impl BbiDataHeader {

    pub const LENGTH : usize = 24;

    pub fn new() -> Self {
        BbiDataHeader {
            chrom_id  : 0,
            start     : 0,
            end       : 0,
            step      : 0,
            span      : 0,
            kind      : 0,
            reserved  : 0,
            item_count: 0,
        }
    }

    pub fn read_buffer<E: ByteOrder>(&mut self, buffer: &[u8]) {
        self.chrom_id   = E::read_u32(&buffer[ 0.. 4]);
        self.start      = E::read_u32(&buffer[ 4.. 8]);
        self.end        = E::read_u32(&buffer[ 8..12]);
        self.step       = E::read_u32(&buffer[12..16]);
        self.span       = E::read_u32(&buffer[16..20]);
        self.kind       = buffer[20];
        self.reserved   = buffer[21];
        self.item_count = E::read_u16(&buffer[22..24]);
    }

    pub fn write_buffer<E: ByteOrder>(&self, buffer: &mut [u8]) {
        E::write_u32(&mut buffer[ 0.. 4], self.chrom_id);
        E::write_u32(&mut buffer[ 4.. 8], self.start);
        E::write_u32(&mut buffer[ 8..12], self.end);
        E::write_u32(&mut buffer[12..16], self.step);
        E::write_u32(&mut buffer[16..20], self.span);
        buffer[20] = self.kind;
        buffer[21] = self.reserved;
        E::write_u16(&mut buffer[22..24], self.item_count);
    }
}

impl Default for BbiDataHeader {
    fn default() -> Self {
        BbiDataHeader::new()
    }
}

/* -------------------------------------------------------------------------- */

#[derive(Debug, Default)]
pub struct BbiHeaderZoom {
    pub reduction_level : u32,
    pub reserved        : u32,
    pub data_offset     : u64,
    pub index_offset    : u64,
    pub n_blocks        : u32,
    pub ptr_data_offset : u64,
    pub ptr_index_offset: u64,
}

/* -------------------------------------------------------------------------- */

impl BbiHeaderZoom {

    pub fn read<E: ByteOrder, R: Read + Seek>(&mut self, file: &mut R) -> io::Result<()> {

        self.reduction_level  = file.read_u32::<E>()?;
        self.reserved         = file.read_u32::<E>()?;

        self.ptr_data_offset  = file.seek(SeekFrom::Current(0))?;
        self.data_offset      = file.read_u64::<E>()?;

        self.ptr_index_offset = file.seek(SeekFrom::Current(0))?;
        self.index_offset     = file.read_u64::<E>()?;

        if self.data_offset > 0 {
            let mut buf = [0u8; 4];
            file_read_at(file, self.data_offset, &mut buf)?;
            self.n_blocks = E::read_u32(&buf);
        }

        Ok(())
    }

    pub fn write<E: ByteOrder, W: Write + Seek>(&mut self, file: &mut W) -> io::Result<()> {
        file.write_u32::<E>(self.reduction_level)?;
        file.write_u32::<E>(self.reserved)?;

        self.ptr_data_offset = file.seek(SeekFrom::Current(0))?;
        file.write_u64::<E>(self.data_offset)?;

        self.ptr_index_offset = file.seek(SeekFrom::Current(0))?;
        file.write_u64::<E>(self.index_offset)?;

        Ok(())
    }

    pub fn write_offsets<E: ByteOrder, W: Write + Seek>(&self, file: &mut W) -> io::Result<()> {
        let mut buf = [0u8; 8];

        if self.ptr_data_offset != 0 {
            E::write_u64(&mut buf, self.data_offset);
            file_write_at(file, self.ptr_data_offset, &buf)?;
        }
        if self.ptr_index_offset != 0 {
            E::write_u64(&mut buf, self.index_offset);
            file_write_at(file, self.ptr_index_offset, &buf)?;
        }
        Ok(())
    }

    pub fn write_n_blocks<E: ByteOrder, W: Write + Seek>(&self, file: &mut W) -> io::Result<()> {
        let mut buf = [0u8; 4];

        E::write_u32(&mut buf, self.n_blocks);

        file_write_at(file, self.data_offset, &buf)
    }
}

/* -------------------------------------------------------------------------- */

// Top-level file descriptor. All cross-referencing offset fields are written
// as zero placeholders first; the `ptr_*` fields record their file positions
// so they can be patched once the true offsets are known
#[derive(Debug, Default)]
pub struct BbiHeader {
    pub magic                  : u32,
    pub version                : u16,
    pub zoom_levels            : u16,
    pub ct_offset              : u64,
    pub data_offset            : u64,
    pub index_offset           : u64,
    pub field_count            : u16,
    pub defined_field_count    : u16,
    pub sql_offset             : u64,
    pub summary_offset         : u64,
    pub uncompress_buf_size    : u32,
    pub extension_offset       : u64,
    pub n_bases_covered        : u64,
    pub min_val                : f64,
    pub max_val                : f64,
    pub sum_data               : f64,
    pub sum_squares            : f64,
    pub zoom_headers           : Vec<BbiHeaderZoom>,
    pub n_blocks               : u64,
    pub ptr_ct_offset          : u64,
    pub ptr_data_offset        : u64,
    pub ptr_index_offset       : u64,
    pub ptr_sql_offset         : u64,
    pub ptr_summary_offset     : u64,
    pub ptr_uncompress_buf_size: u64,
    pub ptr_extension_offset   : u64,
}

/* -------------------------------------------------------------------------- */

impl BbiHeader {

    pub fn new() -> Self {
        BbiHeader {
            version: 4,
            min_val: f64::NAN,
            max_val: f64::NAN,
            ..Default::default()
        }
    }

    // Update the file-wide summary with a value covering n bases
    pub fn summary_add_value(&mut self, x: f64, n: usize) {
        if x.is_nan() {
            return;
        }
        if self.min_val.is_nan() || self.min_val > x {
            self.min_val = x;
        }
        if self.max_val.is_nan() || self.max_val < x {
            self.max_val = x;
        }
        self.n_bases_covered += n as u64;
        self.sum_data        += x;
        self.sum_squares     += x * x;
    }

    pub fn read<E: ByteOrder, R: Read + Seek>(&mut self, file: &mut R, magic: u32) -> io::Result<()> {

        self.magic = file.read_u32::<E>()?;

        if self.magic != magic {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid magic number"));
        }

        self.version                 = file.read_u16::<E>()?;
        self.zoom_levels             = file.read_u16::<E>()?;
        self.ptr_ct_offset           = file.seek(SeekFrom::Current(0))?;
        self.ct_offset               = file.read_u64::<E>()?;
        self.ptr_data_offset         = file.seek(SeekFrom::Current(0))?;
        self.data_offset             = file.read_u64::<E>()?;
        self.ptr_index_offset        = file.seek(SeekFrom::Current(0))?;
        self.index_offset            = file.read_u64::<E>()?;
        self.field_count             = file.read_u16::<E>()?;
        self.defined_field_count     = file.read_u16::<E>()?;
        self.ptr_sql_offset          = file.seek(SeekFrom::Current(0))?;
        self.sql_offset              = file.read_u64::<E>()?;
        self.ptr_summary_offset      = file.seek(SeekFrom::Current(0))?;
        self.summary_offset          = file.read_u64::<E>()?;
        self.ptr_uncompress_buf_size = file.seek(SeekFrom::Current(0))?;
        self.uncompress_buf_size     = file.read_u32::<E>()?;
        self.ptr_extension_offset    = file.seek(SeekFrom::Current(0))?;
        self.extension_offset        = file.read_u64::<E>()?;

        self.zoom_headers = Vec::with_capacity(self.zoom_levels as usize);
        for _ in 0..self.zoom_levels {
            let mut zoom_header = BbiHeaderZoom::default();
            zoom_header.read::<E, R>(file)?;
            self.zoom_headers.push(zoom_header);
        }

        if self.summary_offset > 0 {
            file.seek(SeekFrom::Start(self.summary_offset))?;
            self.n_bases_covered = file.read_u64::<E>()?;
            self.min_val         = file.read_f64::<E>()?;
            self.max_val         = file.read_f64::<E>()?;
            self.sum_data        = file.read_f64::<E>()?;
            self.sum_squares     = file.read_f64::<E>()?;
        }

        if self.data_offset > 0 {
            let mut buf = [0u8; 8];
            file_read_at(file, self.data_offset, &mut buf)?;
            self.n_blocks = E::read_u64(&buf);
        }

        Ok(())
    }

    pub fn write<E: ByteOrder, W: Write + Seek>(&mut self, file: &mut W) -> io::Result<()> {
        file.write_u32::<E>(self.magic)?;
        file.write_u16::<E>(self.version)?;
        file.write_u16::<E>(self.zoom_levels)?;

        self.ptr_ct_offset = file.seek(SeekFrom::Current(0))?;
        file.write_u64::<E>(self.ct_offset)?;

        self.ptr_data_offset = file.seek(SeekFrom::Current(0))?;
        file.write_u64::<E>(self.data_offset)?;

        self.ptr_index_offset = file.seek(SeekFrom::Current(0))?;
        file.write_u64::<E>(self.index_offset)?;

        file.write_u16::<E>(self.field_count)?;
        file.write_u16::<E>(self.defined_field_count)?;

        self.ptr_sql_offset = file.seek(SeekFrom::Current(0))?;
        file.write_u64::<E>(self.sql_offset)?;

        self.ptr_summary_offset = file.seek(SeekFrom::Current(0))?;
        file.write_u64::<E>(self.summary_offset)?;

        self.ptr_uncompress_buf_size = file.seek(SeekFrom::Current(0))?;
        file.write_u32::<E>(self.uncompress_buf_size)?;

        self.ptr_extension_offset = file.seek(SeekFrom::Current(0))?;
        file.write_u64::<E>(self.extension_offset)?;

        for zoom_header in &mut self.zoom_headers {
            zoom_header.write::<E, W>(file)?;
        }

        Ok(())
    }

    pub fn write_offsets<E: ByteOrder, W: Write + Seek>(&self, file: &mut W) -> io::Result<()> {
        let mut buf = [0u8; 8];

        if self.ptr_ct_offset != 0 {
            E::write_u64(&mut buf, self.ct_offset);
            file_write_at(file, self.ptr_ct_offset, &buf)?;
        }
        if self.ptr_data_offset != 0 {
            E::write_u64(&mut buf, self.data_offset);
            file_write_at(file, self.ptr_data_offset, &buf)?;
        }
        if self.ptr_index_offset != 0 {
            E::write_u64(&mut buf, self.index_offset);
            file_write_at(file, self.ptr_index_offset, &buf)?;
        }
        if self.ptr_sql_offset != 0 {
            E::write_u64(&mut buf, self.sql_offset);
            file_write_at(file, self.ptr_sql_offset, &buf)?;
        }
        if self.ptr_extension_offset != 0 {
            E::write_u64(&mut buf, self.extension_offset);
            file_write_at(file, self.ptr_extension_offset, &buf)?;
        }
        Ok(())
    }

    pub fn write_uncompress_buf_size<E: ByteOrder, W: Write + Seek>(&self, file: &mut W) -> io::Result<()> {
        let mut buf = [0u8; 4];

        if self.ptr_uncompress_buf_size != 0 {
            E::write_u32(&mut buf, self.uncompress_buf_size);
            file_write_at(file, self.ptr_uncompress_buf_size, &buf)?;
        }
        Ok(())
    }

    pub fn write_n_blocks<E: ByteOrder, W: Write + Seek>(&self, file: &mut W) -> io::Result<()> {
        let mut buf = [0u8; 8];

        E::write_u64(&mut buf, self.n_blocks);

        file_write_at(file, self.data_offset, &buf)
    }

    // Append the 40-byte summary block at the end of the file and patch
    // the summary offset in the header
    pub fn write_summary<E: ByteOrder, W: Write + Seek>(&mut self, file: &mut W) -> io::Result<()> {
        self.summary_offset = file.seek(SeekFrom::End(0))?;

        file.write_u64::<E>(self.n_bases_covered)?;
        file.write_f64::<E>(self.min_val)?;
        file.write_f64::<E>(self.max_val)?;
        file.write_f64::<E>(self.sum_data)?;
        file.write_f64::<E>(self.sum_squares)?;

        if self.ptr_summary_offset != 0 {
            let mut buf = [0u8; 8];
            E::write_u64(&mut buf, self.summary_offset);
            file_write_at(file, self.ptr_summary_offset, &buf)?;
        }
        Ok(())
    }
}

/* -------------------------------------------------------------------------- */

pub struct BbiQueryType {
    pub data     : BbiSummaryRecord,
    pub data_type: u8,
}

/* -------------------------------------------------------------------------- */

impl BbiQueryType {
    pub fn new() -> Self {
        BbiQueryType {
            data     : BbiSummaryRecord::new(),
            data_type: 0,
        }
    }
}

impl Default for BbiQueryType {
    fn default() -> Self {
        BbiQueryType::new()
    }
}

impl fmt::Display for BbiQueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{data={}, type={}}}", self.data, self.data_type)
    }
}

/* -------------------------------------------------------------------------- */

// In-memory representation of a BBI file: header, chromosome B-tree, the raw
// data R-tree and one R-tree per zoom level. The file handle itself is
// borrowed for each operation; tree nodes only store offsets into it
#[derive(Default)]
pub struct BbiFile {
    pub header    : BbiHeader,
    pub chrom_data: BData,
    pub index     : RTree,
    pub index_zoom: Vec<RTree>,
}

/* -------------------------------------------------------------------------- */

impl BbiFile {

    pub fn new() -> Self {
        BbiFile {
            header    : BbiHeader::new(),
            chrom_data: BData::new(),
            index     : RTree::default(),
            index_zoom: vec![],
        }
    }

    // Read header and chromosome tree; R-trees are read lazily on first
    // query
    pub fn open<E: ByteOrder, R: Read + Seek>(&mut self, reader: &mut R, magic: u32) -> io::Result<()> {
        reader.seek(SeekFrom::Start(0))?;

        self.header.read::<E, R>(reader, magic)?;

        reader.seek(SeekFrom::Start(self.header.ct_offset))?;
        self.chrom_data = BData::new();
        self.chrom_data.read::<E, R>(reader)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("reading chromosome tree failed: {}", e)))?;

        self.index_zoom = (0..self.header.zoom_levels).map(|_| RTree::default()).collect();

        Ok(())
    }

    pub fn read_index<E: ByteOrder, R: Read + Seek>(&mut self, reader: &mut R) -> io::Result<()> {
        reader.seek(SeekFrom::Start(self.header.index_offset))?;
        self.index.read::<E, R>(reader)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("reading data index failed: {}", e)))
    }

    pub fn read_zoom_index<E: ByteOrder, R: Read + Seek>(&mut self, reader: &mut R, i: usize) -> io::Result<()> {
        reader.seek(SeekFrom::Start(self.header.zoom_headers[i].index_offset))?;
        self.index_zoom[i].read::<E, R>(reader)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("reading zoom index {} failed: {}", i, e)))
    }

    fn query_zoom_stream<'a, E: ByteOrder, R: Read + Seek>(
        &'a mut self,
        reader  : &'a mut R,
        zoom_idx: usize,
        chrom_id: i32,
        from    : i32,
        to      : i32,
        bin_size: i32,
    ) -> impl Stream<Item = io::Result<BbiQueryType>> + 'a {

        stream! {

            if self.index_zoom[zoom_idx].is_nil() {
                if let Err(err) = self.read_zoom_index::<E, R>(reader, zoom_idx) {
                    yield Err(err);
                    return;
                }
            }

            let uncompress_buf_size = self.header.uncompress_buf_size;

            let mut result = BbiQueryType::new();

            for r in RTreeTraverser::new(&self.index_zoom[zoom_idx], chrom_id, from, to) {

                let block = match r.vertex.read_block(reader, uncompress_buf_size, r.idx) {
                    Err(err)  => { yield Err(err); return; }
                    Ok(block) => block,
                };

                let decoder = match BbiZoomBlockDecoder::new(&block) {
                    Err(err)    => { yield Err(err); return; }
                    Ok(decoder) => decoder,
                };

                for record in decoder.decode::<E>() {

                    if record.chrom_id != chrom_id || record.from < from || record.to > to {
                        continue;
                    }

                    if result.data.chrom_id == -1 {
                        result.data.chrom_id = record.chrom_id;
                        result.data.from     = record.from;
                        result.data.to       = record.from;
                        result.data_type     = BBI_TYPE_BED_GRAPH;
                    }

                    if result.data.to - result.data.from >= bin_size
                        || result.data.from + bin_size < record.from
                    {
                        if result.data.from != result.data.to {
                            yield Ok(result);
                            result = BbiQueryType::new();
                            result.data_type = BBI_TYPE_BED_GRAPH;
                        }
                    }

                    result.data.add_record(&record);
                }
            }

            if result.data.chrom_id != -1 {
                yield Ok(result);
            }
        }
    }

    fn query_raw_stream<'a, E: ByteOrder, R: Read + Seek>(
        &'a mut self,
        reader  : &'a mut R,
        chrom_id: i32,
        from    : i32,
        to      : i32,
        bin_size: i32,
    ) -> impl Stream<Item = io::Result<BbiQueryType>> + 'a {

        stream! {

            if self.index.is_nil() {
                if let Err(err) = self.read_index::<E, R>(reader) {
                    yield Err(err);
                    return;
                }
            }

            let uncompress_buf_size = self.header.uncompress_buf_size;

            let mut result = BbiQueryType::new();

            for r in RTreeTraverser::new(&self.index, chrom_id, from, to) {

                let block = match r.vertex.read_block(reader, uncompress_buf_size, r.idx) {
                    Err(err)  => { yield Err(err); return; }
                    Ok(block) => block,
                };

                let decoder = match BbiRawBlockDecoder::new::<E>(&block) {
                    Err(err)    => { yield Err(err); return; }
                    Ok(decoder) => decoder,
                };

                // records must tile the requested bins exactly
                if bin_size != 0 && bin_size % decoder.header().span as i32 != 0 {
                    yield Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid binsize"));
                    return;
                }

                let kind = decoder.header().kind;

                for record in decoder.decode::<E>() {

                    if record.chrom_id != chrom_id || record.from < from || record.to > to {
                        continue;
                    }

                    if result.data.chrom_id == -1 {
                        result.data.chrom_id = record.chrom_id;
                        result.data.from     = record.from;
                        result.data.to       = record.from;
                        result.data_type     = kind;
                    }

                    if result.data.to - result.data.from >= bin_size
                        || result.data.from + bin_size < record.from
                    {
                        if result.data.from != result.data.to {
                            yield Ok(result);
                            result = BbiQueryType::new();
                            result.data_type = kind;
                        }
                    }

                    result.data.add_record(&record);
                }
            }

            if result.data.chrom_id != -1 {
                yield Ok(result);
            }
        }
    }

    // Lazily produce summary records for the given genomic range. If
    // bin_size is non-zero the range is snapped to the bin grid and the
    // best zoom level is selected; bin_size zero returns raw records
    pub fn query_stream<'a, E: ByteOrder, R: Read + Seek>(
        &'a mut self,
        reader  : &'a mut R,
        chrom_id: i32,
        from    : i32,
        to      : i32,
        bin_size: i32,
    ) -> impl Stream<Item = io::Result<BbiQueryType>> + 'a {

        let mut from = from;
        let mut to   = to;

        let mut zoom_idx = None;

        if bin_size != 0 {
            from = (from / bin_size) * bin_size;
            to   = ((to + bin_size - 1) / bin_size) * bin_size;

            // select the largest reduction level that divides the bin size;
            // ties are broken in favor of the last header
            for (i, zoom_header) in self.header.zoom_headers.iter().enumerate() {
                if bin_size >= zoom_header.reduction_level as i32
                    && bin_size % zoom_header.reduction_level as i32 == 0
                {
                    zoom_idx = Some(i);
                }
            }
        }

        match zoom_idx {
            Some(i) => Either::Left (self.query_zoom_stream::<E, R>(reader, i, chrom_id, from, to, bin_size)),
            None    => Either::Right(self.query_raw_stream ::<E, R>(reader,    chrom_id, from, to, bin_size)),
        }
    }

    pub fn query<'a, E: ByteOrder, R: Read + Seek>(
        &'a mut self,
        reader  : &'a mut R,
        chrom_id: i32,
        from    : i32,
        to      : i32,
        bin_size: i32,
    ) -> BlockingStream<impl Stream<Item = io::Result<BbiQueryType>> + Unpin + 'a> {

        let s = Box::pin(self.query_stream::<E, R>(reader, chrom_id, from, to, bin_size));

        block_on_stream(s)
    }
}

/* -------------------------------------------------------------------------- */
/* -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {

    use std::io::Cursor;

    use byteorder::LittleEndian;
    use approx::assert_relative_eq;

    use crate::bbi::{BbiHeader, BbiHeaderZoom, BbiSummaryRecord, BbiZoomRecord};

    #[test]
    fn test_zoom_record_add_value() {

        let mut record = BbiZoomRecord {
            min: f32::NAN,
            max: f32::NAN,
            ..Default::default()
        };

        record.add_value(4.0);
        record.add_value(f64::NAN);
        record.add_value(-2.0);

        assert_eq!(record.valid, 2);
        assert_relative_eq!(record.min as f64, -2.0);
        assert_relative_eq!(record.max as f64,  4.0);
        assert_relative_eq!(record.sum as f64,  2.0);
        assert_relative_eq!(record.sum_squares as f64, 20.0);
    }

    #[test]
    fn test_zoom_record_roundtrip() {

        let record = BbiZoomRecord {
            chrom_id   : 3,
            start      : 100,
            end        : 200,
            valid      : 10,
            min        : -1.5,
            max        :  7.25,
            sum        : 12.0,
            sum_squares: 60.5,
        };

        let mut buffer = Vec::new();
        record.write::<LittleEndian, _>(&mut buffer).unwrap();

        assert_eq!(buffer.len(), BbiZoomRecord::LENGTH);

        let mut restored = BbiZoomRecord::default();
        restored.read_buffer::<LittleEndian>(&buffer);

        assert_eq!(restored.chrom_id, 3);
        assert_eq!(restored.start   , 100);
        assert_eq!(restored.end     , 200);
        assert_eq!(restored.valid   , 10);
        assert_relative_eq!(restored.min as f64, -1.5);
        assert_relative_eq!(restored.max as f64,  7.25);
    }

    #[test]
    fn test_summary_record_merge() {

        let mut a = BbiSummaryRecord::new();
        let mut b = BbiSummaryRecord::new();

        a.chrom_id = 0;
        a.from     = 0;
        a.to       = 10;
        a.statistics.valid = 10.0;
        a.statistics.min   = 1.0;
        a.statistics.max   = 2.0;
        a.statistics.sum   = 15.0;
        a.statistics.sum_squares = 25.0;

        b.chrom_id = 0;
        b.from     = 10;
        b.to       = 20;
        b.statistics.valid = 10.0;
        b.statistics.min   = 0.5;
        b.statistics.max   = 3.0;
        b.statistics.sum   = 20.0;
        b.statistics.sum_squares = 45.0;

        let mut merged = BbiSummaryRecord::new();
        merged.add_record(&a);
        merged.add_record(&b);

        assert_eq!(merged.from,  0);
        assert_eq!(merged.to  , 20);
        assert_relative_eq!(merged.statistics.valid, 20.0);
        assert_relative_eq!(merged.statistics.min  ,  0.5);
        assert_relative_eq!(merged.statistics.max  ,  3.0);
        assert_relative_eq!(merged.statistics.sum  , 35.0);
        assert_relative_eq!(merged.statistics.sum_squares, 70.0);
    }

    #[test]
    fn test_summary_record_gap() {

        let mut a = BbiSummaryRecord::new();
        let mut b = BbiSummaryRecord::new();

        a.chrom_id = 0;
        a.from     = 0;
        a.to       = 10;
        a.statistics.valid = 10.0;
        a.statistics.min   = 1.0;
        a.statistics.max   = 2.0;
        a.statistics.sum   = 15.0;

        // gap of 5 bases between both records
        b.chrom_id = 0;
        b.from     = 15;
        b.to       = 25;
        b.statistics.valid = 10.0;
        b.statistics.min   = 1.0;
        b.statistics.max   = 3.0;
        b.statistics.sum   = 20.0;

        let mut merged = BbiSummaryRecord::new();
        merged.add_record(&a);
        merged.add_record(&b);

        assert_eq!(merged.to, 25);
        // the gap counts as zero-valued coverage
        assert_relative_eq!(merged.statistics.valid, 25.0);
        assert_relative_eq!(merged.statistics.min  ,  0.0);
        assert_relative_eq!(merged.statistics.sum  , 35.0);
    }

    #[test]
    fn test_summary_record_empty_statistics() {

        let mut a = BbiSummaryRecord::new();

        a.chrom_id = 0;
        a.from     = 0;
        a.to       = 10;
        a.statistics.valid = 1.0;
        a.statistics.min   = 2.0;
        a.statistics.max   = 2.0;
        a.statistics.sum   = 2.0;

        // empty record: min/max must not be perturbed
        let mut b = BbiSummaryRecord::new();
        b.chrom_id = 0;
        b.from     = 10;
        b.to       = 20;

        let mut merged = BbiSummaryRecord::new();
        merged.add_record(&a);
        merged.add_record(&b);

        assert_relative_eq!(merged.statistics.min, 2.0);
        assert_relative_eq!(merged.statistics.max, 2.0);
        assert_relative_eq!(merged.statistics.valid, 1.0);
    }

    #[test]
    fn test_header_roundtrip() {

        let mut file = Cursor::new(Vec::new());

        let mut header = BbiHeader::new();
        header.magic               = 0x888FFC26;
        header.zoom_levels         = 1;
        header.uncompress_buf_size = 4096;
        header.zoom_headers.push(BbiHeaderZoom {
            reduction_level: 40,
            ..Default::default()
        });

        header.write::<LittleEndian, _>(&mut file).unwrap();

        // fake data section so that the block count can be resolved
        use byteorder::WriteBytesExt;
        use std::io::{Seek, SeekFrom};

        header.data_offset = file.seek(SeekFrom::Current(0)).unwrap();
        file.write_u64::<LittleEndian>(0).unwrap();

        header.n_blocks = 7;
        header.write_offsets ::<LittleEndian, _>(&mut file).unwrap();
        header.write_n_blocks::<LittleEndian, _>(&mut file).unwrap();
        header.write_summary ::<LittleEndian, _>(&mut file).unwrap();

        file.seek(SeekFrom::Start(0)).unwrap();

        let mut restored = BbiHeader::default();
        restored.read::<LittleEndian, _>(&mut file, 0x888FFC26).unwrap();

        assert_eq!(restored.zoom_levels, 1);
        assert_eq!(restored.zoom_headers[0].reduction_level, 40);
        assert_eq!(restored.uncompress_buf_size, 4096);
        assert_eq!(restored.data_offset, header.data_offset);
        assert_eq!(restored.n_blocks, 7);
        assert_eq!(restored.n_bases_covered, 0);
    }

    #[test]
    fn test_header_invalid_magic() {

        let mut file = Cursor::new(Vec::new());

        let mut header = BbiHeader::new();
        header.magic = 0x12345678;
        header.write::<LittleEndian, _>(&mut file).unwrap();

        use std::io::{Seek, SeekFrom};
        file.seek(SeekFrom::Start(0)).unwrap();

        let mut restored = BbiHeader::default();
        let result = restored.read::<LittleEndian, _>(&mut file, 0x888FFC26);

        assert!(result.is_err());
    }
}
