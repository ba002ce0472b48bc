//! Windows DXGI desktop duplication capture.
//!
//! Production pattern (Desktop Duplication API):
//!
//! 1. `D3D11CreateDevice` on the adapter owning the target monitor.
//! 2. `IDXGIOutput1::DuplicateOutput` to obtain an `IDXGIOutputDuplication`.
//! 3. Per frame: `AcquireNextFrame(timeout_ms, &mut frame_info, &mut resource)`.
//!    - `DXGI_ERROR_WAIT_TIMEOUT` → no change; a normal idle return, not an
//!      error.
//!    - `frame_info.LastPresentTime == 0` → cursor-only update; release the
//!      frame and report no change (no new desktop image exists).
//!    - Otherwise map the staging texture (`CopyResource` + `Map`) and copy
//!      the BGRA rows into a pooled buffer, honoring the mapped row pitch
//!      as the stride.
//! 4. `ReleaseFrame` before the next acquire.
//! 5. `DXGI_ERROR_ACCESS_LOST` (resolution change, monitor unplug, secure
//!    desktop / UAC prompt) → drop the duplication and report
//!    [`CaptureError::AccessLost`]; the recovery wrapper rebuilds from step 2.
//!
//! `AcquireNextFrame`'s blocking timeout paces the capture loop; the
//! recommended value is `max(16, 1000 / target_fps + 4)` ms so the loop
//! wakes just after each vsync at the target rate. No sleeps anywhere.
//!
//! This module holds the contract-level scaffold; the D3D11/DXGI FFI calls
//! are behind the `windows` crate in a production build and are not linked
//! here.

#![cfg(target_os = "windows")]

use std::time::Duration;

use super::{CaptureError, CaptureEvent, ScreenSource};

/// Desktop-duplication screen source for one monitor.
pub struct DxgiScreenSource {
    width: i32,
    height: i32,
}

impl DxgiScreenSource {
    /// Opens duplication for `monitor_index` (0 = primary).
    ///
    /// # Errors
    ///
    /// [`CaptureError::DeviceNotPresent`] when the monitor does not exist,
    /// [`CaptureError::AccessDenied`] when duplication is unavailable
    /// (e.g. another duplication session owns the output).
    pub fn open(monitor_index: u32) -> Result<Self, CaptureError> {
        // Production: enumerate outputs via IDXGIFactory1, create the D3D11
        // device, and call DuplicateOutput here, mapping
        // DXGI_ERROR_NOT_FOUND → DeviceNotPresent and
        // E_ACCESSDENIED / DXGI_ERROR_UNSUPPORTED → AccessDenied.
        Err(CaptureError::DeviceNotPresent(format!(
            "DXGI duplication for monitor {monitor_index} requires the Windows backend"
        )))
    }
}

impl ScreenSource for DxgiScreenSource {
    fn next_frame(&mut self, _timeout: Duration) -> Result<CaptureEvent, CaptureError> {
        // Production: AcquireNextFrame(timeout) as described in the module
        // docs, renting the pixel buffer from the shared pool.
        Err(CaptureError::Backend(
            "DXGI capture backend not linked in this build".to_string(),
        ))
    }

    fn dimensions(&self) -> (i32, i32) {
        (self.width, self.height)
    }
}
