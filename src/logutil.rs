//! Log helpers for byte-oriented traffic so hex dumps stay short and single-line.

/// Render the first `max` bytes of `data` as lowercase hex, with a marker when
/// the input was longer.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    use std::fmt::Write;
    let shown = data.len().min(max);
    let mut out = String::with_capacity(shown * 2 + 16);
    for b in &data[..shown] {
        let _ = write!(&mut out, "{:02x}", b);
    }
    if data.len() > shown {
        let _ = write!(&mut out, "..({} bytes)", data.len());
    }
    out
}
