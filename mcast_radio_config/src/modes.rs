/*
 * Copyright 2020 The Regents of the University of California
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

//!
//! The modes table file
//!
//! One line per named mode: `name demod low high shift [option]`, where
//! demod is fm, am or linear. Comment lines begin with `#`, `*` or `/`.
//! Lines that are too short or do not parse are skipped.
//!

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// The demodulator a mode runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemodName {
    /// NBFM and noncoherent PM
    Fm,
    /// Envelope detection of AM
    Am,
    /// Coherent demodulation of AM, DSB, BPSK, SSB
    Linear,
}

/// Mode option flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeOption {
    /// Independent sideband
    Conj,
    /// FM without de-emphasis
    Flat,
    /// Calibration; implies coherent
    Cal,
    /// Squaring loop; implies coherent
    Square,
    /// Coherent carrier tracking
    Coherent,
    /// Envelope output from the linear demodulator
    Envelope,
}

/// One parsed line of the modes table
#[derive(Debug, Clone, PartialEq)]
pub struct ModeLine {
    /// Mode name
    pub name: String,
    /// Demodulator
    pub demod: DemodName,
    /// Lower filter cutoff in Hz
    pub low: f32,
    /// Upper filter cutoff in Hz
    pub high: f32,
    /// Audio frequency shift in Hz
    pub shift: f32,
    /// Option flags
    pub options: Vec<ModeOption>,
}

/// Reads a modes table from a file
pub fn read_modes_file(path: &Path) -> io::Result<Vec<ModeLine>> {
    let file = File::open(path)?;
    parse_modes(BufReader::new(file))
}

/// Parses a modes table
pub fn parse_modes<R: BufRead>(reader: R) -> io::Result<Vec<ModeLine>> {
    let mut modes = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(&['#', '*', '/'][..]) {
            continue;
        }
        if let Some(mode) = parse_line(trimmed) {
            modes.push(mode);
        }
    }
    Ok(modes)
}

fn parse_line(line: &str) -> Option<ModeLine> {
    let mut fields = line.split_whitespace();
    let name = fields.next()?;
    let demod = match fields.next()?.to_ascii_lowercase().as_str() {
        "fm" => DemodName::Fm,
        "am" => DemodName::Am,
        "linear" => DemodName::Linear,
        _ => return None,
    };
    let low: f32 = fields.next()?.parse().ok()?;
    let high: f32 = fields.next()?.parse().ok()?;
    // The shift column and the option are both optional
    let shift: f32 = match fields.next() {
        Some(field) => field.parse().ok()?,
        None => 0.0,
    };
    let mut options = Vec::new();
    if let Some(option) = fields.next() {
        match option.to_ascii_lowercase().as_str() {
            "conj" => options.push(ModeOption::Conj),
            "flat" => options.push(ModeOption::Flat),
            "cal" => {
                options.push(ModeOption::Cal);
                options.push(ModeOption::Coherent);
            }
            "square" => {
                options.push(ModeOption::Square);
                options.push(ModeOption::Coherent);
            }
            "coherent" => options.push(ModeOption::Coherent),
            "env" => options.push(ModeOption::Envelope),
            // Unknown options set no flags
            _ => {}
        }
    }
    Some(ModeLine {
        name: name.to_owned(),
        demod,
        low,
        high,
        shift,
        options,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    const TABLE: &str = "\
# Standard modes
* another comment style
/ and a third
fm    fm      -8000  8000  0
fmf   fm      -8000  8000  0  flat
am    am      -5000  5000  0
usb   linear    300  3000  0
lsb   linear  -3000  -300  0
cwu   linear    300  1000  -700
isb   linear  -3000  3000  0  conj
ame   linear  -5000  5000  0  env
dsb   linear  -5000  5000  0  square
cal   linear  -1000  1000  0  cal

short line
mystery wavelet -1 1 0
notanumber am low high 0
";

    #[test]
    fn parses_standard_table() {
        let modes = parse_modes(Cursor::new(TABLE)).expect("read failed");
        assert_eq!(modes.len(), 10);

        assert_eq!(modes[0].name, "fm");
        assert_eq!(modes[0].demod, DemodName::Fm);
        assert_eq!(modes[0].low, -8000.0);
        assert_eq!(modes[0].high, 8000.0);
        assert!(modes[0].options.is_empty());

        assert_eq!(modes[1].options, vec![ModeOption::Flat]);
        assert_eq!(modes[5].shift, -700.0);
        assert_eq!(modes[6].options, vec![ModeOption::Conj]);
        assert_eq!(modes[7].options, vec![ModeOption::Envelope]);
        assert_eq!(
            modes[8].options,
            vec![ModeOption::Square, ModeOption::Coherent]
        );
        assert_eq!(
            modes[9].options,
            vec![ModeOption::Cal, ModeOption::Coherent]
        );
    }

    #[test]
    fn skips_malformed_lines() {
        let modes = parse_modes(Cursor::new(TABLE)).expect("read failed");
        assert!(modes.iter().all(|mode| mode.name != "short"));
        assert!(modes.iter().all(|mode| mode.name != "mystery"));
        assert!(modes.iter().all(|mode| mode.name != "notanumber"));
    }

    #[test]
    fn shift_defaults_to_zero() {
        let modes =
            parse_modes(Cursor::new("usb linear 300 3000")).expect("read failed");
        assert_eq!(modes.len(), 1);
        assert_eq!(modes[0].shift, 0.0);
    }

    #[test]
    fn unknown_option_sets_no_flags() {
        let modes =
            parse_modes(Cursor::new("usb linear 300 3000 0 sparkle")).expect("read failed");
        assert_eq!(modes.len(), 1);
        assert!(modes[0].options.is_empty());
    }
}
