use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static LOG_DIR: OnceLock<PathBuf> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn label(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERRO",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Level::Info => "\x1b[32m",
            Level::Warn => "\x1b[33m",
            Level::Error => "\x1b[31m",
        }
    }
}

/// 启用按天切分的日志文件 `<dir>/YYYY-MM-DD.log`，只能设置一次
pub fn init_file(dir: PathBuf) {
    if std::fs::create_dir_all(&dir).is_ok() {
        let _ = LOG_DIR.set(dir);
    }
}

/// `[MM-DD HH:MM:SS] [LEVEL] [Target] Message`，不含颜色
fn plain_line(time: &str, level: Level, target: &str, args: std::fmt::Arguments) -> String {
    format!("[{}] [{}] [{}] {}", time, level.label(), target, args)
}

fn append_file(dir: &Path, line: &str) {
    let path = dir.join(format!("{}.log", Local::now().format("%Y-%m-%d")));
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(file, "{}", line);
    }
}

/// 错误写入 stderr，其余写入 stdout；启用日志文件时同时追加一行纯文本
pub fn print(level: Level, target: &str, args: std::fmt::Arguments) {
    let time = Local::now().format("%m-%d %H:%M:%S").to_string();
    let colored = format!(
        "\x1b[90m[{}] {}[{}]\x1b[0m \x1b[36m[{}]\x1b[0m {}",
        time,
        level.color(),
        level.label(),
        target,
        args
    );
    match level {
        Level::Error => eprintln!("{}", colored),
        _ => println!("{}", colored),
    }
    if let Some(dir) = LOG_DIR.get() {
        append_file(dir, &plain_line(&time, level, target, args));
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log {
    ($level:ident, target: $target:expr, $($arg:tt)+) => (
        $crate::log::print($crate::log::Level::$level, $target, format_args!($($arg)+))
    );
    ($level:ident, $($arg:tt)+) => (
        $crate::log::print($crate::log::Level::$level, "System", format_args!($($arg)+))
    );
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => ($crate::__log!(Info, $($arg)+));
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => ($crate::__log!(Warn, $($arg)+));
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => ($crate::__log!(Error, $($arg)+));
}
