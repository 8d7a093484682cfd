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

/* -------------------------------------------------------------------------- */

// Reducer applied to a summary record when binning query results. Arguments
// are (sum, sum_squares, min, max, n)
pub type BinSummaryStatistics = fn(f64, f64, f64, f64, f64) -> f64;

/* -------------------------------------------------------------------------- */

pub fn bin_mean(sum: f64, _sum_squares: f64, _min: f64, _max: f64, n: f64) -> f64 {
    sum / n
}

pub fn bin_max(_sum: f64, _sum_squares: f64, _min: f64, max: f64, _n: f64) -> f64 {
    max
}

pub fn bin_min(_sum: f64, _sum_squares: f64, min: f64, _max: f64, _n: f64) -> f64 {
    min
}

pub fn bin_discrete_mean(sum: f64, _sum_squares: f64, _min: f64, _max: f64, n: f64) -> f64 {
    (sum / n).floor() + 0.5
}

pub fn bin_discrete_max(_sum: f64, _sum_squares: f64, _min: f64, max: f64, _n: f64) -> f64 {
    max.floor()
}

pub fn bin_discrete_min(_sum: f64, _sum_squares: f64, min: f64, _max: f64, _n: f64) -> f64 {
    min.floor()
}

pub fn bin_variance(sum: f64, sum_squares: f64, _min: f64, _max: f64, n: f64) -> f64 {
    sum_squares / n - (sum / n) * (sum / n)
}

/* -------------------------------------------------------------------------- */

pub fn bin_summary_statistics_from_string(s: &str) -> Option<BinSummaryStatistics> {
    match s {
        "mean"          => Some(bin_mean),
        "max"           => Some(bin_max),
        "min"           => Some(bin_min),
        "discrete mean" => Some(bin_discrete_mean),
        "discrete max"  => Some(bin_discrete_max),
        "discrete min"  => Some(bin_discrete_min),
        "variance"      => Some(bin_variance),
        _               => None,
    }
}
