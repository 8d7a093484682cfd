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

use flate2::Compression;
use flate2::write::ZlibEncoder;
use flate2::read::ZlibDecoder;

/* -------------------------------------------------------------------------- */

/// Read `data.len()` bytes at `offset` without moving the file cursor. Used
/// to resolve forward references while a file is written or read
/// sequentially.
pub fn file_read_at<T: Read + Seek>(file: &mut T, offset: u64, data: &mut [u8]) -> io::Result<()> {
    let current_position = file.seek(SeekFrom::Current(0))?;
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(data)?;
    file.seek(SeekFrom::Start(current_position))?;
    Ok(())
}

/// Write `data` at `offset` without moving the file cursor. This is the
/// primitive behind all offset back-patching: placeholder fields are written
/// as zero first and patched once the true file position is known.
pub fn file_write_at<T: Write + Seek>(file: &mut T, offset: u64, data: &[u8]) -> io::Result<()> {
    let current_position = file.seek(SeekFrom::Current(0))?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)?;
    file.seek(SeekFrom::Start(current_position))?;
    Ok(())
}

/* -------------------------------------------------------------------------- */

pub fn compress_slice(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    let compressed_data = encoder.finish()?;
    Ok(compressed_data)
}

pub fn uncompress_slice(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut buffer  = Vec::new();
    decoder.read_to_end(&mut buffer)?;
    Ok(buffer)
}

/* -------------------------------------------------------------------------- */
/* -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {

    use std::io::{Cursor, Seek, SeekFrom};

    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;

    use crate::utility_io::{compress_slice, uncompress_slice, file_read_at, file_write_at};

    #[test]
    fn test_compress_roundtrip() {

        let mut rng = StdRng::seed_from_u64(42);

        for n in [1, 17, 1024, 65537] {

            let data: Vec<u8> = (0..n).map(|_| rng.gen()).collect();

            let compressed = compress_slice(&data).unwrap();
            let restored   = uncompress_slice(&compressed).unwrap();

            assert_eq!(restored, data);
        }
    }

    #[test]
    fn test_uncompress_corrupt() {

        assert!(uncompress_slice(&[0x12, 0x34, 0x56]).is_err());

    }

    #[test]
    fn test_read_write_at() {

        let mut file = Cursor::new(vec![0u8; 16]);

        file.seek(SeekFrom::Start(5)).unwrap();

        file_write_at(&mut file, 8, &[1, 2, 3, 4]).unwrap();

        // cursor must not have moved
        assert_eq!(file.seek(SeekFrom::Current(0)).unwrap(), 5);

        let mut data = [0u8; 4];
        file_read_at(&mut file, 8, &mut data).unwrap();

        assert_eq!(data, [1, 2, 3, 4]);
        assert_eq!(file.seek(SeekFrom::Current(0)).unwrap(), 5);
    }
}
