//! stackmirror binary: redirect every top-level window offscreen and
//! repaint the screen from their bound textures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stackmirror::render::QuadRenderer;
use stackmirror::x11::X11Backend;
use stackmirror::{Compositor, Config, Error};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stackmirror=debug,info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load configuration")?;

    let backend = X11Backend::new(
        config.connection.display.as_deref(),
        config.connection.manual_redirect,
    )
    .context("Failed to connect to X server")?;

    let (screen_width, screen_height) = backend.screen_size();
    info!(
        screen_width,
        screen_height,
        overlay = backend.overlay(),
        "Compositing started"
    );

    let mut compositor = Compositor::new(backend)?;
    let renderer = QuadRenderer::new().context("Failed to initialize renderer")?;
    renderer.viewport(screen_width, screen_height);

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context("Failed to install signal handler")?;
    }

    let frame_budget = Duration::from_secs(1) / config.compositor.target_fps.max(1);
    let [bg_r, bg_g, bg_b] = config.compositor.background;

    while !shutdown.load(Ordering::Relaxed) {
        let frame_start = Instant::now();

        let drained = compositor.pump_events();
        if drained > 0 {
            debug!(drained, "Processed structural notifications");
        }

        renderer.clear(bg_r, bg_g, bg_b);

        // Paint bottom to top so later windows occlude earlier ones.
        let windows: Vec<u32> = compositor.windows().map(|record| record.window).collect();
        for window in windows {
            let attrs = match compositor.backend().window_attributes(window) {
                Ok(attrs) => attrs,
                Err(err) => {
                    // The window may have vanished between pump and paint.
                    debug!(window, %err, "Skipping window without attributes");
                    continue;
                }
            };
            if !attrs.viewable || attrs.width == 0 || attrs.height == 0 {
                continue;
            }

            let texture = match compositor.acquire_texture(window) {
                Ok(texture) => texture,
                Err(Error::NoCompatibleFormat { depth }) => {
                    debug!(window, depth, "No bindable pixel format, not painting");
                    continue;
                }
                Err(err) => {
                    warn!(window, %err, "Failed to bind window contents");
                    continue;
                }
            };

            renderer.draw_window(
                compositor.backend().glx(),
                texture,
                attrs.x as f32,
                attrs.y as f32,
                attrs.width as f32,
                attrs.height as f32,
                screen_width as f32,
                screen_height as f32,
                config.compositor.opacity,
            );
        }

        compositor.backend().swap_buffers();

        let elapsed = frame_start.elapsed();
        if elapsed < frame_budget {
            std::thread::sleep(frame_budget - elapsed);
        }
    }

    // Free every binding while the connection is still up; dropping the
    // backend afterwards unredirects the tree.
    info!("Shutting down");
    compositor.shutdown();
    Ok(())
}
