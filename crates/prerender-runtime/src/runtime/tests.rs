#[cfg(test)]
mod tests {
    use crate::{CallbackRegistry, RenderContext, RenderError, Renderer, RendererConfig};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HELLO: &str = "const entry = () => 'hello, ' + params";

    #[test]
    fn test_shutdown_acknowledged_by_every_worker() {
        for workers in [1, 3, 6] {
            let config = RendererConfig::new().with_workers(workers);
            let renderer = Renderer::new(HELLO, config, CallbackRegistry::new()).unwrap();
            assert_eq!(renderer.stats().workers, workers);
            assert_eq!(renderer.shutdown_counted(), workers);
        }
    }

    #[test]
    fn test_second_shutdown_is_noop() {
        let renderer = Renderer::new(HELLO, RendererConfig::default(), CallbackRegistry::new()).unwrap();
        assert_eq!(renderer.shutdown_counted(), 4);
        assert_eq!(renderer.shutdown_counted(), 0);
        assert!(renderer.is_shut_down());
        assert_eq!(renderer.generation(), 0);
    }

    #[test]
    fn test_render_after_shutdown_is_usage_error() {
        let renderer = Renderer::new(HELLO, RendererConfig::default(), CallbackRegistry::new()).unwrap();
        renderer.shutdown();
        let err = renderer.render(&RenderContext::new(), "x").unwrap_err();
        assert!(matches!(err, RenderError::ShutDown));
    }

    #[test]
    fn test_callback_runs_once_per_reference() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callbacks = CallbackRegistry::new().register("cb", move |_, args| {
            counter.fetch_add(1, Ordering::SeqCst);
            if args.string(0).as_deref() == Some("x") {
                json!("works!")
            } else {
                json!("fails")
            }
        });

        let renderer = Renderer::new(
            "const entry = () => 'Calling cb() - ' + cb('x')",
            RendererConfig::new().with_workers(2),
            callbacks,
        )
        .unwrap();

        for n in 1..=5 {
            let result = renderer.render(&RenderContext::new(), "blah").unwrap();
            assert_eq!(result.output(), "Calling cb() - works!");
            assert_eq!(calls.load(Ordering::SeqCst), n);
        }
    }

    #[test]
    fn test_callback_not_invoked_when_unreferenced() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callbacks = CallbackRegistry::new().register("cb", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            json!(null)
        });

        let renderer = Renderer::new(HELLO, RendererConfig::default(), callbacks).unwrap();
        renderer.render(&RenderContext::new(), "x").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stats_count_failures() {
        let renderer = Renderer::new(
            "const entry = () => params === 'bad' ? missing : 'ok'",
            RendererConfig::new().with_workers(1),
            CallbackRegistry::new(),
        )
        .unwrap();

        renderer.render(&RenderContext::new(), "good").unwrap();
        renderer.render(&RenderContext::new(), "bad").unwrap();

        let stats = renderer.stats();
        assert_eq!(stats.generation, 1);
        assert_eq!(stats.renders, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.reloads, 0);
    }
}
