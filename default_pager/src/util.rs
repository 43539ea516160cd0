/*
 *  Copyright (C) 2025  Markus Elias Gerber
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

#[inline]
pub(crate) const fn round_up_to_nearest(num: usize, multiple: usize) -> usize {
    div_ceil(num, multiple) * multiple
}

/// efficient way to calculate: ceil(x / y)
#[inline]
pub(crate) const fn div_ceil(num: usize, div: usize) -> usize {
    (num + div - 1) / div
}

/// Number of pages needed to hold `bytes` bytes, saturating at `usize::MAX`
#[inline]
pub(crate) fn pages_for(bytes: u64, page_size: usize) -> usize {
    let page_size = page_size as u64;
    let pages = bytes / page_size + u64::from(bytes % page_size != 0);
    usize::try_from(pages).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod test {
    use super::{div_ceil, pages_for, round_up_to_nearest};

    #[test]
    fn test_div_ceil() {
        // just test a bunch of different values
        for y in 1..100 {
            for x in 0..y * 3 {
                let expected_value = if x % y == 0 { x / y } else { (x / y) + 1 };

                assert_eq!(div_ceil(x, y), expected_value);
            }
        }
    }

    #[test]
    fn test_round_up_to_nearest() {
        assert_eq!(round_up_to_nearest(0, 256), 0);
        assert_eq!(round_up_to_nearest(1, 256), 256);
        assert_eq!(round_up_to_nearest(256, 256), 256);
        assert_eq!(round_up_to_nearest(1025, 256), 1280);
    }

    #[test]
    fn test_pages_for() {
        assert_eq!(pages_for(0, 4096), 0);
        assert_eq!(pages_for(1, 4096), 1);
        assert_eq!(pages_for(4096 * 5, 4096), 5);
        assert_eq!(pages_for(4096 * 5 + 1, 4096), 6);

        // no limit at all
        assert_eq!(pages_for(u64::MAX, 1), usize::MAX);
        assert!(pages_for(u64::MAX, 4096) > 0);
    }
}
