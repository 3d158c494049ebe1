use std::fmt::Debug;

/// Writes the contained `&str` directly (without `"`s) to the Formatter.
///
/// Handy to keep `{:#?}` output of optional scalar fields on one line.
pub struct DebugInline<'a>(pub &'a str);

impl<'a> Debug for DebugInline<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Adds `name: value` to `debug_struct` only when `value` is `Some`.
pub fn opt_field<'a, 'b: 'a>(debug_struct: &mut std::fmt::DebugStruct<'a, 'b>,
                             name: &str, value: &Option<impl Debug>)
{
    let Some(ref value) = value else {
        return;
    };

    debug_struct.field(name, value);
}

/// Formats seconds as `h:mm:ss`, or `m:ss` below an hour.
pub fn seconds_hms(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 { seconds as u64 } else { 0 };
    let (h, m, s) = (total / 3600, (total / 60) % 60, total % 60);

    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}
