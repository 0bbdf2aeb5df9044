/*
 * Copyright 2019 The Regents of the University of California
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

//! Kaiser window synthesis
//!
//! The window tapers the truncated impulse response of a designed filter.
//! The transition region width grows with approximately sqrt(1 + beta^2).

use std::f32::consts::PI;

/// Modified Bessel function of the first kind, order zero
///
/// Power series sum (x^2/4)^k / (k!)^2, terminated when the next term falls
/// below 1e-12 of the running sum
fn bessel_i0(x: f32) -> f32 {
    let t = 0.25 * x * x;
    let mut sum = 1.0 + t;
    let mut term = t;
    for k in 2..40 {
        term *= t / ((k * k) as f32);
        sum += term;
        if term < 1e-12 * sum {
            break;
        }
    }
    sum
}

/// Computes a symmetric length-m Kaiser window with the provided shape parameter
///
/// Only half the window is evaluated; the other half is mirrored. For odd m
/// the middle value is forced to exactly 1.
pub fn make_kaiser(m: usize, beta: f32) -> Vec<f32> {
    assert!(m >= 2, "window length must be at least 2");
    let mut window = vec![0.0f32; m];
    let numc = PI * beta;
    let inv_denom = 1.0 / bessel_i0(numc);
    let pc = 2.0 / (m - 1) as f32;

    for n in 0..m / 2 {
        let p = pc * n as f32 - 1.0;
        let value = bessel_i0(numc * (1.0 - p * p).sqrt()) * inv_denom;
        window[n] = value;
        window[m - 1 - n] = value;
    }
    if m & 1 != 0 {
        window[(m - 1) / 2] = 1.0;
    }
    window
}
