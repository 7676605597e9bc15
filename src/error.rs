/// Turns a `Result` into an `Option`, logging the error it discards.
pub trait ResultOkLogExt<T, E> {
    /// Logs a discarded error at error level.
    fn ok_log(self) -> Option<T>;

    /// Logs a discarded error at `level`, for values whose absence is expected on some hosts.
    fn ok_log_at(self, level: log::Level) -> Option<T>;
}

impl<T, E> ResultOkLogExt<T, E> for std::result::Result<T, E>
where
    E: std::error::Error,
{
    fn ok_log(self) -> Option<T> {
        self.ok_log_at(log::Level::Error)
    }

    fn ok_log_at(self, level: log::Level) -> Option<T> {
        match self {
            Ok(ok) => Some(ok),
            Err(err) => {
                log::log!(level, "{err}");
                None
            }
        }
    }
}
