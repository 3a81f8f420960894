//! Terminal output helpers.
//! 终端输出工具。
//!
//! Results go to stdout, problems to stderr. Colors are dropped when
//! `NO_COLOR` is set.
//! 结果输出到 stdout，问题输出到 stderr。设置 `NO_COLOR` 时不使用颜色。

use std::path::Path;

const GREEN: &str = "32";
const YELLOW: &str = "33";
const RED: &str = "31";
const BLUE: &str = "34";

fn paint(code: &str, text: &str) -> String {
    if std::env::var_os("NO_COLOR").is_some() {
        text.to_string()
    } else {
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

/// Print a success message in green.
/// 以绿色打印成功消息。
pub fn success(msg: &str) {
    println!("{}", paint(GREEN, msg));
}

/// Print a warning to stderr.
/// 向 stderr 打印警告。
pub fn warning(msg: &str) {
    eprintln!("{} {msg}", paint(YELLOW, "warning:"));
}

/// Print an error to stderr.
/// 向 stderr 打印错误。
pub fn error(msg: &str) {
    eprintln!("{} {msg}", paint(RED, "error:"));
}

/// Print a built artifact.
/// 打印构建产物。
pub fn result(path: &Path) {
    println!("{} {}", paint(BLUE, "result:"), path.display());
}
