/* This file is part of ringwatch
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::ffi::CStr;

use crate::{Error, Result};

/// Hostname of the local machine as reported by `gethostname(2)`.
pub fn system_hostname() -> Result<String> {
    let mut buf = [0 as libc::c_char; 256];

    let r = unsafe { libc::gethostname(buf.as_mut_ptr(), buf.len()) };
    if r != 0 {
        return Err(std::io::Error::last_os_error().into())
    }

    // POSIX does not promise termination on truncation
    buf[buf.len() - 1] = 0;
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    let name = name.to_string_lossy().trim().to_string();

    if name.is_empty() {
        return Err(Error::ConfigInvalid("system hostname is empty".to_string()))
    }

    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_hostname_is_printable() {
        let name = system_hostname().unwrap();
        assert!(!name.is_empty());
        assert!(!name.contains('\0'));
    }
}
