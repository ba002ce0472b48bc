//! XOR delta computation with a fused all-zero check.
//!
//! The video sender XORs each new frame against the reference frame and, in
//! the same pass, learns whether anything changed at all. A static desktop
//! XORs to all zeroes and the frame is skipped without touching the wire.
//!
//! The kernel runs over `u64` lanes (eight pixels' worth of channel bytes
//! per step) with a scalar tail, OR-folding every lane into an accumulator
//! so the zero check costs no second pass.

/// Writes `current XOR reference` into `out` and reports whether any output
/// byte is non-zero.
///
/// # Panics
///
/// Panics if the three slices differ in length. Callers key the delta path
/// on a length match with the reference; a mismatch forces a keyframe
/// upstream instead of ever reaching this function.
pub fn xor_into(current: &[u8], reference: &[u8], out: &mut [u8]) -> bool {
    assert_eq!(current.len(), reference.len());
    assert_eq!(current.len(), out.len());

    let mut acc: u64 = 0;

    let mut cur_lanes = current.chunks_exact(8);
    let mut ref_lanes = reference.chunks_exact(8);
    let mut out_lanes = out.chunks_exact_mut(8);

    for ((c, r), o) in (&mut cur_lanes).zip(&mut ref_lanes).zip(&mut out_lanes) {
        let lane = u64::from_ne_bytes(c.try_into().unwrap())
            ^ u64::from_ne_bytes(r.try_into().unwrap());
        acc |= lane;
        o.copy_from_slice(&lane.to_ne_bytes());
    }

    for ((c, r), o) in cur_lanes
        .remainder()
        .iter()
        .zip(ref_lanes.remainder())
        .zip(out_lanes.into_remainder())
    {
        let byte = c ^ r;
        acc |= byte as u64;
        *o = byte;
    }

    acc != 0
}

/// Reconstructs absolute pixels by XOR-applying `delta` onto `reference`
/// in place.
///
/// # Panics
///
/// Panics if the slices differ in length; the receiver validates lengths
/// against the frame sub-header before applying.
pub fn apply_in_place(reference: &mut [u8], delta: &[u8]) {
    assert_eq!(reference.len(), delta.len());

    let mut ref_lanes = reference.chunks_exact_mut(8);
    let mut delta_lanes = delta.chunks_exact(8);

    for (r, d) in (&mut ref_lanes).zip(&mut delta_lanes) {
        let lane = u64::from_ne_bytes(r.as_ref().try_into().unwrap())
            ^ u64::from_ne_bytes(d.try_into().unwrap());
        r.copy_from_slice(&lane.to_ne_bytes());
    }

    for (r, d) in ref_lanes
        .into_remainder()
        .iter_mut()
        .zip(delta_lanes.remainder())
    {
        *r ^= d;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
