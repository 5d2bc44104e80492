use std::io::Write;

/// 以 Info 为默认等级初始化日志
///
/// `RUST_LOG` 存在时以环境变量为准
pub fn init_log() {
    init_log_with_level(log::LevelFilter::Info);
}

/// 初始化 Truvis 风格的 logger
///
/// 可以重复调用：logger 已经安装时直接返回，方便测试和多个入口共用
pub fn init_log_with_level(level: log::LevelFilter) {
    let result = env_logger::Builder::new()
        .format(|buf, record| {
            let level_style = level_style(buf, record.level());
            let grey_style = anstyle::Style::new().fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));
            let thread_style = anstyle::Style::new().fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(90, 120, 160))));

            let line = record.line().unwrap_or(!0);
            // windows 和 unix 的分隔符都要处理
            let file = record.file().unwrap_or("").rsplit(['\\', '/']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();
            let thread = std::thread::current();
            let thread_name = thread.name().unwrap_or("unnamed");

            writeln!(
                buf,
                "{level_style}[{time}] {level:<5}{level_style:#} {thread_style}<{thread_name}>{thread_style:#} \
                 {grey_style}[{file}:{line}]{grey_style:#} {}",
                record.args()
            )
        })
        .filter(None, level)
        .parse_default_env()
        .try_init();

    if result.is_err() {
        log::debug!("logger already initialized, skip");
    }
}

fn level_style(buf: &env_logger::fmt::Formatter, level: log::Level) -> anstyle::Style {
    let color = match level {
        log::Level::Info => anstyle::AnsiColor::Green,
        log::Level::Warn => anstyle::AnsiColor::Yellow,
        log::Level::Error => anstyle::AnsiColor::Red,
        _ => return buf.default_level_style(level),
    };
    buf.default_level_style(level).fg_color(Some(anstyle::Color::Ansi(color)))
}
