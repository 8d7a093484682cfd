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

use std::io;
use std::marker::PhantomData;

use byteorder::{ByteOrder, WriteBytesExt};

use crate::bbi::{
    BbiDataHeader, BbiSummaryRecord, BbiZoomRecord,
    BBI_TYPE_BED_GRAPH, BBI_TYPE_FIXED, BBI_TYPE_VARIABLE,
};

/* -------------------------------------------------------------------------- */

fn record_width(kind: u8) -> Option<usize> {
    match kind {
        BBI_TYPE_BED_GRAPH => Some(12),
        BBI_TYPE_VARIABLE  => Some( 8),
        BBI_TYPE_FIXED     => Some( 4),
        _                  => None,
    }
}

/* -------------------------------------------------------------------------- */

// Decoder for raw data blocks. The block starts with a 24-byte data header
// followed by item_count records whose width depends on the track type
pub struct BbiRawBlockDecoder<'a> {
    header: BbiDataHeader,
    body  : &'a [u8],
}

/* -------------------------------------------------------------------------- */

impl<'a> BbiRawBlockDecoder<'a> {

    pub fn new<E: ByteOrder>(buffer: &'a [u8]) -> io::Result<BbiRawBlockDecoder<'a>> {

        if buffer.len() < BbiDataHeader::LENGTH {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "block length is shorter than 24 bytes"));
        }
        let mut header = BbiDataHeader::new();
        header.read_buffer::<E>(buffer);

        let body = &buffer[BbiDataHeader::LENGTH..];

        match record_width(header.kind) {
            None => {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "unsupported block type"));
            }
            Some(width) => {
                if body.len() % width != 0 {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "data block has invalid length"));
                }
            }
        }

        Ok(BbiRawBlockDecoder { header, body })
    }

    pub fn header(&self) -> &BbiDataHeader {
        &self.header
    }

    pub fn decode<E: ByteOrder>(&self) -> BbiRawBlockDecoderIterator<'_, E> {
        BbiRawBlockDecoderIterator {
            decoder : self,
            position: 0,
            phantom : PhantomData,
        }
    }
}

/* -------------------------------------------------------------------------- */

pub struct BbiRawBlockDecoderIterator<'a, E: ByteOrder> {
    decoder : &'a BbiRawBlockDecoder<'a>,
    position: usize,
    phantom : PhantomData<E>,
}

/* -------------------------------------------------------------------------- */

fn single_value_record(chrom_id: u32, from: i32, to: i32, value: f64) -> BbiSummaryRecord {
    let mut record = BbiSummaryRecord::new();

    record.chrom_id               = chrom_id as i32;
    record.from                   = from;
    record.to                     = to;
    record.statistics.valid       = 1.0;
    record.statistics.min         = value;
    record.statistics.max         = value;
    record.statistics.sum         = value;
    record.statistics.sum_squares = value * value;
    record
}

impl<'a, E: ByteOrder> Iterator for BbiRawBlockDecoderIterator<'a, E> {

    type Item = BbiSummaryRecord;

    fn next(&mut self) -> Option<Self::Item> {

        let header = &self.decoder.header;
        let body   = self.decoder.body;

        if self.position >= body.len() {
            return None;
        }

        let record = match header.kind {
            BBI_TYPE_BED_GRAPH => {
                let buffer = &body[self.position..self.position + 12];
                let from   = E::read_u32(&buffer[0.. 4]) as i32;
                let to     = E::read_u32(&buffer[4.. 8]) as i32;
                let value  = f32::from_bits(E::read_u32(&buffer[8..12])) as f64;
                single_value_record(header.chrom_id, from, to, value)
            }
            BBI_TYPE_VARIABLE => {
                let buffer = &body[self.position..self.position + 8];
                let from   = E::read_u32(&buffer[0..4]) as i32;
                let value  = f32::from_bits(E::read_u32(&buffer[4..8])) as f64;
                single_value_record(header.chrom_id, from, from + header.span as i32, value)
            }
            BBI_TYPE_FIXED => {
                let buffer = &body[self.position..self.position + 4];
                let i      = self.position / 4;
                let from   = (header.start + i as u32 * header.step) as i32;
                let value  = f32::from_bits(E::read_u32(buffer)) as f64;
                single_value_record(header.chrom_id, from, from + header.span as i32, value)
            }
            // checked during construction
            _ => unreachable!(),
        };

        self.position += record_width(header.kind).unwrap();

        Some(record)
    }
}

/* -------------------------------------------------------------------------- */

// Decoder for zoom data blocks, which are plain arrays of 32-byte zoom
// records with no block header
pub struct BbiZoomBlockDecoder<'a> {
    buffer: &'a [u8],
}

/* -------------------------------------------------------------------------- */

impl<'a> BbiZoomBlockDecoder<'a> {

    pub fn new(buffer: &'a [u8]) -> io::Result<BbiZoomBlockDecoder<'a>> {
        if buffer.len() % BbiZoomRecord::LENGTH != 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "zoom data block has invalid length"));
        }
        Ok(BbiZoomBlockDecoder { buffer })
    }

    pub fn decode<E: ByteOrder>(&self) -> BbiZoomBlockDecoderIterator<'_, E> {
        BbiZoomBlockDecoderIterator {
            decoder : self,
            position: 0,
            phantom : PhantomData,
        }
    }
}

/* -------------------------------------------------------------------------- */

pub struct BbiZoomBlockDecoderIterator<'a, E: ByteOrder> {
    decoder : &'a BbiZoomBlockDecoder<'a>,
    position: usize,
    phantom : PhantomData<E>,
}

/* -------------------------------------------------------------------------- */

impl<'a, E: ByteOrder> Iterator for BbiZoomBlockDecoderIterator<'a, E> {

    type Item = BbiSummaryRecord;

    fn next(&mut self) -> Option<Self::Item> {

        if self.position >= self.decoder.buffer.len() {
            return None;
        }

        let mut zoom_record = BbiZoomRecord::default();
        zoom_record.read_buffer::<E>(&self.decoder.buffer[self.position..self.position + BbiZoomRecord::LENGTH]);

        self.position += BbiZoomRecord::LENGTH;

        let mut record = BbiSummaryRecord::new();
        record.chrom_id               = zoom_record.chrom_id as i32;
        record.from                   = zoom_record.start    as i32;
        record.to                     = zoom_record.end      as i32;
        record.statistics.valid       = zoom_record.valid       as f64;
        record.statistics.min         = zoom_record.min         as f64;
        record.statistics.max         = zoom_record.max         as f64;
        record.statistics.sum         = zoom_record.sum         as f64;
        record.statistics.sum_squares = zoom_record.sum_squares as f64;

        Some(record)
    }
}

/* Result type of both the raw and zoom block encoder
 * -------------------------------------------------------------------------- */

#[derive(Debug, Default)]
pub struct BbiBlockEncoderType {
    pub from : usize,
    pub to   : usize,
    pub block: Vec<u8>,
}

/* -------------------------------------------------------------------------- */

// Splits one chromosome's binned samples into raw data blocks of at most
// items_per_slot records. Fixed-step blocks break at NaN gaps; variable-step
// blocks drop NaN and zero samples
pub struct BbiRawBlockEncoder {
    items_per_slot: usize,
    fixed_step    : bool,
}

/* -------------------------------------------------------------------------- */

impl BbiRawBlockEncoder {

    pub fn new(items_per_slot: usize, fixed_step: bool) -> Self {
        BbiRawBlockEncoder {
            items_per_slot,
            fixed_step,
        }
    }

    pub fn encode<'a, E: ByteOrder>(&self, chrom_id: u32, sequence: &'a [f64], bin_size: usize) -> BbiRawBlockEncoderIterator<'a, E> {
        BbiRawBlockEncoderIterator {
            items_per_slot: self.items_per_slot,
            fixed_step    : self.fixed_step,
            chrom_id,
            sequence,
            bin_size,
            position      : 0,
            phantom       : PhantomData,
        }
    }
}

/* -------------------------------------------------------------------------- */

pub struct BbiRawBlockEncoderIterator<'a, E: ByteOrder> {
    items_per_slot: usize,
    fixed_step    : bool,
    chrom_id      : u32,
    sequence      : &'a [f64],
    bin_size      : usize,
    position      : usize,
    phantom       : PhantomData<E>,
}

/* -------------------------------------------------------------------------- */

impl<'a, E: ByteOrder> BbiRawBlockEncoderIterator<'a, E> {

    fn next_fixed(&mut self) -> io::Result<BbiBlockEncoderType> {

        let mut header = BbiDataHeader {
            chrom_id: self.chrom_id,
            start   : (self.bin_size * self.position) as u32,
            end     : (self.bin_size * self.position) as u32,
            step    : self.bin_size as u32,
            span    : self.bin_size as u32,
            kind    : BBI_TYPE_FIXED,
            ..Default::default()
        };

        let mut values = Vec::new();

        while self.position < self.sequence.len() {
            let value = self.sequence[self.position];

            if value.is_nan() {
                break;
            }
            values.push(value);
            header.item_count += 1;
            header.end        += header.step;
            self.position     += 1;

            if header.item_count as usize == self.items_per_slot {
                break;
            }
        }

        let mut block = vec![0u8; BbiDataHeader::LENGTH];
        header.write_buffer::<E>(&mut block);

        for value in &values {
            block.write_u32::<E>((*value as f32).to_bits())?;
        }

        Ok(BbiBlockEncoderType {
            from : header.start as usize,
            to   : header.end   as usize,
            block,
        })
    }

    fn next_variable(&mut self) -> io::Result<BbiBlockEncoderType> {

        let mut header = BbiDataHeader {
            chrom_id: self.chrom_id,
            start   : (self.bin_size * self.position) as u32,
            end     : (self.bin_size * self.position) as u32,
            step    : self.bin_size as u32,
            span    : self.bin_size as u32,
            kind    : BBI_TYPE_VARIABLE,
            ..Default::default()
        };

        let mut entries = Vec::new();

        while self.position < self.sequence.len() {
            let value = self.sequence[self.position];

            if !value.is_nan() && value != 0.0 {
                let from = (self.bin_size * self.position) as u32;
                entries.push((from, value));
                header.item_count += 1;
                header.end         = from + header.span;
            }
            self.position += 1;

            if header.item_count as usize == self.items_per_slot {
                break;
            }
        }

        let mut block = vec![0u8; BbiDataHeader::LENGTH];
        header.write_buffer::<E>(&mut block);

        for (from, value) in &entries {
            block.write_u32::<E>(*from)?;
            block.write_u32::<E>((*value as f32).to_bits())?;
        }

        Ok(BbiBlockEncoderType {
            from : header.start as usize,
            to   : header.end   as usize,
            block,
        })
    }
}

impl<'a, E: ByteOrder> Iterator for BbiRawBlockEncoderIterator<'a, E> {

    type Item = io::Result<BbiBlockEncoderType>;

    fn next(&mut self) -> Option<Self::Item> {

        // advance to the next sample that starts a block
        if self.fixed_step {
            while self.position < self.sequence.len() && self.sequence[self.position].is_nan() {
                self.position += 1;
            }
        } else {
            while self.position < self.sequence.len()
                && (self.sequence[self.position].is_nan() || self.sequence[self.position] == 0.0)
            {
                self.position += 1;
            }
        }

        if self.position >= self.sequence.len() {
            return None;
        }

        if self.fixed_step {
            Some(self.next_fixed())
        } else {
            Some(self.next_variable())
        }
    }
}

/* -------------------------------------------------------------------------- */

// Aggregates binned samples into zoom records covering reduction_level
// bases each and packs them into blocks of at most items_per_slot records.
// Windows without any data are skipped
pub struct BbiZoomBlockEncoder {
    items_per_slot : usize,
    reduction_level: usize,
}

/* -------------------------------------------------------------------------- */

impl BbiZoomBlockEncoder {

    pub fn new(items_per_slot: usize, reduction_level: usize) -> Self {
        BbiZoomBlockEncoder {
            items_per_slot,
            reduction_level,
        }
    }

    pub fn encode<'a, E: ByteOrder>(&self, chrom_id: u32, sequence: &'a [f64], bin_size: usize) -> BbiZoomBlockEncoderIterator<'a, E> {
        BbiZoomBlockEncoderIterator {
            items_per_slot : self.items_per_slot,
            reduction_level: self.reduction_level,
            chrom_id,
            sequence,
            bin_size,
            position       : 0,
            phantom        : PhantomData,
        }
    }
}

/* -------------------------------------------------------------------------- */

pub struct BbiZoomBlockEncoderIterator<'a, E: ByteOrder> {
    items_per_slot : usize,
    reduction_level: usize,
    chrom_id       : u32,
    sequence       : &'a [f64],
    bin_size       : usize,
    position       : usize,
    phantom        : PhantomData<E>,
}

/* -------------------------------------------------------------------------- */

impl<'a, E: ByteOrder> Iterator for BbiZoomBlockEncoderIterator<'a, E> {

    type Item = io::Result<BbiBlockEncoderType>;

    fn next(&mut self) -> Option<Self::Item> {

        let seq_end = self.bin_size * self.sequence.len();

        // number of samples per reduction window
        let n = (self.reduction_level + self.bin_size - 1) / self.bin_size;

        let mut records = Vec::new();
        let mut from    = -1i64;
        let mut to      = -1i64;

        let mut p = self.position;

        while p < seq_end {

            let i = p / self.bin_size;

            let mut record = BbiZoomRecord {
                chrom_id: self.chrom_id,
                start   : p as u32,
                end     : (p + self.reduction_level).min(seq_end) as u32,
                min     : f32::NAN,
                max     : f32::NAN,
                ..Default::default()
            };

            let mut has_data = false;

            for j in 0..n {
                if i + j < self.sequence.len() {
                    let value = self.sequence[i + j];
                    if !value.is_nan() && value != 0.0 {
                        has_data = true;
                    }
                    record.add_value(value);
                }
            }

            p += self.reduction_level;

            if has_data {
                if from == -1 {
                    from = record.start as i64;
                }
                to = record.end as i64;
                records.push(record);

                if records.len() == self.items_per_slot {
                    break;
                }
            }
        }

        self.position = p;

        if records.is_empty() {
            return None;
        }

        let mut block = Vec::new();
        for record in &records {
            if let Err(err) = record.write::<E, _>(&mut block) {
                return Some(Err(err));
            }
        }

        Some(Ok(BbiBlockEncoderType {
            from: from as usize,
            to  : to   as usize,
            block,
        }))
    }
}

/* -------------------------------------------------------------------------- */
/* -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {

    use byteorder::LittleEndian;
    use approx::assert_relative_eq;

    use crate::bbi::{BbiDataHeader, BBI_TYPE_FIXED, BBI_TYPE_VARIABLE};
    use crate::bbi_block::{
        BbiRawBlockDecoder, BbiRawBlockEncoder,
        BbiZoomBlockDecoder, BbiZoomBlockEncoder,
    };

    #[test]
    fn test_raw_encoder_fixed() {

        let sequence: Vec<f64> = (0..10).map(|i| i as f64).collect();

        let encoder = BbiRawBlockEncoder::new(3, true);

        let chunks: Vec<_> = encoder.encode::<LittleEndian>(0, &sequence, 10)
            .map(|item| item.unwrap())
            .collect();

        // ten samples with three items per slot
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].from,  0);
        assert_eq!(chunks[0].to  , 30);
        assert_eq!(chunks[3].from, 90);
        assert_eq!(chunks[3].to  , 100);

        // decode the second chunk and verify positions and values
        let decoder = BbiRawBlockDecoder::new::<LittleEndian>(&chunks[1].block).unwrap();

        assert_eq!(decoder.header().kind, BBI_TYPE_FIXED);
        assert_eq!(decoder.header().item_count, 3);

        let records: Vec<_> = decoder.decode::<LittleEndian>().collect();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].from, 30);
        assert_eq!(records[0].to  , 40);
        assert_relative_eq!(records[0].statistics.sum, 3.0);
        assert_relative_eq!(records[2].statistics.sum, 5.0);
    }

    #[test]
    fn test_raw_encoder_fixed_nan_gap() {

        let sequence = vec![1.0, 2.0, f64::NAN, f64::NAN, 3.0, 4.0];

        let encoder = BbiRawBlockEncoder::new(100, true);

        let chunks: Vec<_> = encoder.encode::<LittleEndian>(0, &sequence, 10)
            .map(|item| item.unwrap())
            .collect();

        // the gap splits the sequence into two blocks
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].from,  0);
        assert_eq!(chunks[0].to  , 20);
        assert_eq!(chunks[1].from, 40);
        assert_eq!(chunks[1].to  , 60);
    }

    #[test]
    fn test_raw_encoder_variable() {

        let sequence = vec![0.0, 1.5, 0.0, f64::NAN, 2.5, 0.0];

        let encoder = BbiRawBlockEncoder::new(100, false);

        let chunks: Vec<_> = encoder.encode::<LittleEndian>(0, &sequence, 10)
            .map(|item| item.unwrap())
            .collect();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].from, 10);
        assert_eq!(chunks[0].to  , 50);

        let decoder = BbiRawBlockDecoder::new::<LittleEndian>(&chunks[0].block).unwrap();

        assert_eq!(decoder.header().kind, BBI_TYPE_VARIABLE);

        let records: Vec<_> = decoder.decode::<LittleEndian>().collect();

        // zero and NaN samples are dropped
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].from, 10);
        assert_eq!(records[0].to  , 20);
        assert_relative_eq!(records[0].statistics.sum, 1.5);
        assert_eq!(records[1].from, 40);
        assert_relative_eq!(records[1].statistics.sum, 2.5);
    }

    #[test]
    fn test_raw_decoder_malformed() {

        // shorter than the data header
        assert!(BbiRawBlockDecoder::new::<LittleEndian>(&[0u8; 10]).is_err());

        // unsupported block type
        let mut header = BbiDataHeader::new();
        header.kind = 9;
        let mut block = vec![0u8; BbiDataHeader::LENGTH];
        header.write_buffer::<LittleEndian>(&mut block);
        assert!(BbiRawBlockDecoder::new::<LittleEndian>(&block).is_err());

        // misaligned body
        let mut header = BbiDataHeader::new();
        header.kind = BBI_TYPE_FIXED;
        let mut block = vec![0u8; BbiDataHeader::LENGTH];
        header.write_buffer::<LittleEndian>(&mut block);
        block.extend_from_slice(&[1, 2, 3]);
        assert!(BbiRawBlockDecoder::new::<LittleEndian>(&block).is_err());
    }

    #[test]
    fn test_zoom_encoder() {

        // twenty samples at bin size 10, reduced to windows of 20 bases;
        // samples 6 and 7 are zero so the window [60, 80) is skipped
        let mut sequence: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        sequence[6] = 0.0;
        sequence[7] = 0.0;

        let encoder = BbiZoomBlockEncoder::new(100, 20);

        let chunks: Vec<_> = encoder.encode::<LittleEndian>(0, &sequence, 10)
            .map(|item| item.unwrap())
            .collect();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].from,   0);
        assert_eq!(chunks[0].to  , 200);

        let decoder = BbiZoomBlockDecoder::new(&chunks[0].block).unwrap();

        let records: Vec<_> = decoder.decode::<LittleEndian>().collect();

        assert_eq!(records.len(), 9);
        assert_eq!(records[0].from,  0);
        assert_eq!(records[0].to  , 20);
        assert_relative_eq!(records[0].statistics.valid, 2.0);
        assert_relative_eq!(records[0].statistics.sum  , 3.0);

        // window [60, 80) is absent
        assert_eq!(records[3].from, 80);
    }

    #[test]
    fn test_zoom_encoder_clamped_end() {

        let sequence: Vec<f64> = vec![1.0, 2.0, 3.0];

        let encoder = BbiZoomBlockEncoder::new(100, 20);

        let chunks: Vec<_> = encoder.encode::<LittleEndian>(0, &sequence, 10)
            .map(|item| item.unwrap())
            .collect();

        assert_eq!(chunks.len(), 1);

        let decoder = BbiZoomBlockDecoder::new(&chunks[0].block).unwrap();
        let records: Vec<_> = decoder.decode::<LittleEndian>().collect();

        // the last window is clamped to the sequence end
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].from, 20);
        assert_eq!(records[1].to  , 30);
    }

    #[test]
    fn test_zoom_decoder_malformed() {

        assert!(BbiZoomBlockDecoder::new(&[0u8; 33]).is_err());
        assert!(BbiZoomBlockDecoder::new(&[0u8; 64]).is_ok());
    }
}
