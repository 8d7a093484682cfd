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
use std::io;

/* -------------------------------------------------------------------------- */

#[derive(Debug)]
pub enum Error {
    /// Malformed on-disk data: bad magic number, truncated or misaligned
    /// buffer, corrupt compression stream
    Format(String),
    /// Violated construction-time constraint, e.g. key/value width mismatch
    /// or an invalid block-size/bin-size relationship
    Constraint(String),
    /// Chromosome or sequence name absent from the file
    NotFound(String),
    IO(io::Error),
}

/* -------------------------------------------------------------------------- */

impl From<io::Error> for Error {
    fn from(e : io::Error) -> Self {
        Error::IO(e)
    }
}

impl From<String> for Error {
    fn from(str : String) -> Self {
        Error::Constraint(str)
    }
}

/* -------------------------------------------------------------------------- */

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Format    (v) => f.pad(&format!("{}", v)),
            Error::Constraint(v) => f.pad(&format!("{}", v)),
            Error::NotFound  (v) => f.pad(&format!("{}", v)),
            Error::IO        (v) => f.pad(&format!("{}", v)),
        }
    }
}

/* -------------------------------------------------------------------------- */

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IO(v) => Some(v),
            _            => None,
        }
    }
}
