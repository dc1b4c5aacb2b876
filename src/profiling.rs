use std::{
    future::Future,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, trace, warn, Level};

/// Awaits `fut` and logs `message` at `level`, with every `%t` replaced by
/// the elapsed time.
pub async fn profile<F: Future>(level: Level, message: &str, fut: F) -> F::Output {
    let start = Instant::now();
    let output = fut.await;
    log_elapsed(level, message, start.elapsed());
    output
}

fn log_elapsed(level: Level, message: &str, elapsed: Duration) {
    let text = render(message, elapsed);
    if level == Level::ERROR {
        error!(?elapsed, "{text}");
    } else if level == Level::WARN {
        warn!(?elapsed, "{text}");
    } else if level == Level::INFO {
        info!(?elapsed, "{text}");
    } else if level == Level::DEBUG {
        debug!(?elapsed, "{text}");
    } else {
        trace!(?elapsed, "{text}");
    }
}

fn render(message: &str, elapsed: Duration) -> String {
    message.replace("%t", &format!("{elapsed:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_every_placeholder() {
        let text = render("took %t (%t)", Duration::from_millis(5));
        assert_eq!(text, "took 5ms (5ms)");
    }

    #[test]
    fn render_without_placeholder_is_unchanged() {
        assert_eq!(render("done", Duration::from_secs(1)), "done");
    }
}
