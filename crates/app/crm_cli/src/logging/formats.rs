use flexi_logger::{DeferredNow, Record, style};

/// `HH:MM:SS LEVEL message`, level colored.
pub fn cli_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record,
) -> std::io::Result<()> {
    let level = record.level();
    write!(
        w,
        "{} {:<5} {}",
        now.format("%H:%M:%S"),
        style(level).paint(level.to_string()),
        record.args()
    )
}
