use std::io::Write;

/// 初始化全局 logger
///
/// 重复调用时只有第一次生效（测试中多个用例可能各自调用）。
pub fn init_log(level: log::LevelFilter) {
    let _ = env_logger::Builder::new()
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let warn_style = buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
            let error_style = buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => warn_style,
                log::Level::Error => error_style,
                _ => buf.default_level_style(record.level()),
            };
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));
            let thread_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(90, 120, 160))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").split(['\\', '/']).last().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();
            // worker 线程都有名字，方便区分是哪个 loader 打出的日志
            let current = std::thread::current();
            let thread = current.name().unwrap_or("unnamed");

            writeln!(
                buf,
                "{level_style}[{time}] {level}{level_style:#} {thread_style}<{thread}>{thread_style:#} \
                 {grey_style}[{file}:{line}]{grey_style:#} {}",
                record.args()
            )
        })
        .filter(None, level)
        .try_init();
}

/// 将配置文件中的字符串解析为日志等级，无法识别时退回 Info
pub fn parse_level(level: &str) -> log::LevelFilter {
    level.parse().unwrap_or_else(|_| {
        eprintln!("unknown log level '{}', fallback to info", level);
        log::LevelFilter::Info
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), log::LevelFilter::Debug);
        assert_eq!(parse_level("WARN"), log::LevelFilter::Warn);
        assert_eq!(parse_level("nonsense"), log::LevelFilter::Info);
    }

    #[test]
    fn test_init_log_twice() {
        init_log(log::LevelFilter::Info);
        init_log(log::LevelFilter::Debug);
        log::info!("logger initialised twice without panic");
    }
}
