// Copyright 2026 the Stack Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The boundary between executing modules and the outside world.

use std::io::{Read, Write};

/// Receives the I/O system calls of an executing module.
///
/// Both calls return the number of bytes transferred, or a negative value
/// to signal an error; the raw return value is pushed back to the module
/// unchanged.
pub trait Host {
    /// Handles a `write` syscall against descriptor `fd`.
    fn write(&mut self, fd: i64, buf: &[u8]) -> i64;

    /// Handles a `read` syscall against descriptor `fd`.
    fn read(&mut self, fd: i64, buf: &mut [u8]) -> i64;
}

/// A host backed by the process's standard streams.
///
/// Descriptor 0 reads from stdin; descriptors 1 and 2 write to stdout and
/// stderr. Any other descriptor fails with `-1`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl Host for SystemHost {
    fn write(&mut self, fd: i64, buf: &[u8]) -> i64 {
        let written = match fd {
            1 => std::io::stdout().write(buf),
            2 => std::io::stderr().write(buf),
            _ => return -1,
        };
        match written {
            Ok(n) => n as i64,
            Err(_) => -1,
        }
    }

    fn read(&mut self, fd: i64, buf: &mut [u8]) -> i64 {
        if fd != 0 {
            return -1;
        }
        match std::io::stdin().read(buf) {
            Ok(n) => n as i64,
            Err(_) => -1,
        }
    }
}
