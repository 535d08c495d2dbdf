//! Worker startup utilities.

use cadence_jobs::QueueName;
use tracing::info;

/// Prints worker startup information.
pub fn print_startup_info(environment: &str, redis_url: &str, queues: &[QueueName]) {
    let separator = "=".repeat(60);
    info!("{}", separator);
    info!("Environment: {}", environment);
    info!("Redis:       {}", redis_url);
    for queue in queues {
        info!("Queue:       {}", queue);
    }
    info!("{}", separator);
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_jobs::QueueNamer;

    #[test]
    fn test_print_startup_info_does_not_panic() {
        let _ = tracing_subscriber::fmt::try_init();
        let queues = vec![QueueNamer::default().name(None, Some("system")).unwrap()];
        print_startup_info("development", "redis://localhost:6379", &queues);
    }
}
