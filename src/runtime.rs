//! Reference-counted guard over FFmpeg's process-wide initialization.
//! Each pipeline instance holds a guard; the first acquire runs global
//! init and the last drop releases it, instead of every instance touching
//! the process singleton directly.

use std::sync::{Mutex, PoisonError};

use ffmpeg_next::ffi;

static REFS: Mutex<usize> = Mutex::new(0);

/// Keeps the FFmpeg runtime alive while held.
pub struct RuntimeGuard(());

pub fn acquire() -> anyhow::Result<RuntimeGuard> {
    let mut refs = REFS.lock().unwrap_or_else(PoisonError::into_inner);
    if *refs == 0 {
        ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg init: {}", e))?;
        unsafe {
            ffi::avformat_network_init();
        }
    }
    *refs += 1;
    Ok(RuntimeGuard(()))
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        let mut refs = REFS.lock().unwrap_or_else(PoisonError::into_inner);
        *refs -= 1;
        if *refs == 0 {
            unsafe {
                ffi::avformat_network_deinit();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_acquires_release_in_any_order() {
        let first = acquire().unwrap();
        let second = acquire().unwrap();
        drop(first);
        // the runtime must still be usable under the surviving guard
        let third = acquire().unwrap();
        drop(second);
        drop(third);
    }
}
