use std::path::{Path, PathBuf};

/// Stand-in for yt-dlp: prints metadata JSON unless `-o` is given, in which
/// case it writes five bytes to that path and prints it.
pub const FAKE_DOWNLOAD_SCRIPT: &str = r#"out=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-o" ]; then out="$arg"; fi
  prev="$arg"
done
if [ -z "$out" ]; then
  echo '{"title":"Test: Clip?","duration":65,"thumbnail":"https://i.ytimg.com/vi/abc/hq.jpg","description":"fake"}'
  exit 0
fi
printf 'media' > "$out"
echo "$out"
"#;

#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
