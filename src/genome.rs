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

/* -------------------------------------------------------------------------- */

// Container holding the names and lengths of all chromosomes of a genome
// assembly. The BigWig reader populates this structure from the chromosome
// B-tree; the writer serializes it back
#[derive(Clone, Debug, Default)]
pub struct Genome {
    pub seqnames: Vec<String>,
    pub lengths : Vec<usize>,
}

/* -------------------------------------------------------------------------- */

impl Genome {

    pub fn new(seqnames: Vec<String>, lengths: Vec<usize>) -> Self {
        if seqnames.len() != lengths.len() {
            panic!("Genome::new(): invalid parameters");
        }
        Genome { seqnames, lengths }
    }

    pub fn len(&self) -> usize {
        self.seqnames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seqnames.is_empty()
    }

    pub fn get_idx(&self, seqname: &str) -> Option<usize> {
        self.seqnames.iter().position(|name| name == seqname)
    }

    pub fn seq_length(&self, seqname: &str) -> Result<usize, String> {
        self.get_idx(seqname)
            .map(|i| self.lengths[i])
            .ok_or_else(|| format!("sequence `{}` not found in genome", seqname))
    }
}

/* -------------------------------------------------------------------------- */

impl fmt::Display for Genome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<10} {:>10}", "seqnames", "lengths")?;
        for i in 0..self.seqnames.len() {
            writeln!(f, "{:<10} {:>10}", self.seqnames[i], self.lengths[i])?;
        }
        Ok(())
    }
}

/* -------------------------------------------------------------------------- */
/* -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {

    use crate::genome::Genome;

    #[test]
    fn test_genome_1() {

        let genome = Genome::new(
            vec!["chr1".to_string(), "chr2".to_string()],
            vec![1000, 2000],
        );

        assert_eq!(genome.len(), 2);
        assert_eq!(genome.get_idx("chr2"), Some(1));
        assert_eq!(genome.get_idx("chr3"), None);
        assert_eq!(genome.seq_length("chr1"), Ok(1000));
        assert!(genome.seq_length("chr3").is_err());
    }
}
