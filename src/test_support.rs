use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Writes an executable `/bin/sh` script into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A stand-in for the student's image program: validates its arguments the
/// way the assignment requires and writes a placeholder image.
pub fn write_student_program(dir: &Path, name: &str) -> PathBuf {
    write_script(
        dir,
        name,
        r#"if [ $# -lt 1 ]; then
  echo "Please provide a path to a file."
  exit 1
fi
case "$1" in
  *.gif) ;;
  *) echo "$1 is missing the required file extension .gif."; exit 1 ;;
esac
echo "Image 1...completed." >&2
printf 'GIF89a' > "$1"
exit 0"#,
    )
}

/// A stand-in for the comparison tool that prints a fixed report.
pub fn write_compare_tool(dir: &Path, report: &str) -> PathBuf {
    write_script(
        dir,
        "fake_gm",
        &format!("cat <<'REPORT'\n{report}\nREPORT\nexit 0"),
    )
}

pub fn pae_report(red: f64, green: f64, blue: f64, total: f64) -> String {
    format!(
        "Image Difference (PeakAbsoluteError):\n           Normalized    Absolute\n          ============  ==========\n     Red: {red:.10} {:.10}\n   Green: {green:.10} {:.10}\n    Blue: {blue:.10} {:.10}\n   Total: {total:.10} {:.10}",
        red * 255.0,
        green * 255.0,
        blue * 255.0,
        total * 255.0
    )
}
