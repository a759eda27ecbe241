use crate::broadcast::EventHub;
use crate::mapping::{OutputBinding, RawEvent};
use crate::output::OutputSink;
use crate::persistence::Resolver;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

fn apply<O: OutputSink>(sink: &mut O, pressed: &[OutputBinding], released: &[OutputBinding]) {
    if pressed.is_empty() && released.is_empty() {
        return;
    }
    if let Err(e) = sink.apply(pressed, released) {
        error!("Failed to apply output: {}", e);
    }
}

/// Consumes raw device events until cancelled or the device stream ends.
///
/// Every event is echoed to the hub, resolved against the active profile and
/// applied to the sink. Whatever is still held is released when the active
/// profile switches and when the loop exits.
pub async fn run_event_loop<O: OutputSink>(
    mut events: mpsc::Receiver<RawEvent>,
    mut resolver: Resolver,
    mut sink: O,
    hub: EventHub,
    cancel: CancellationToken,
) -> O {
    info!(
        "Starting event loop with profile {:?}",
        resolver.active_name()
    );
    let mut processed: u64 = 0;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("Event loop shutting down");
                break;
            }
            _ = resolver.profile_changed() => {
                let released = resolver.sync_profile();
                if !released.is_empty() {
                    info!(
                        "Profile switched to {:?}, releasing {} held outputs",
                        resolver.active_name(),
                        released.len()
                    );
                }
                apply(&mut sink, &[], &released);
            }
            event = events.recv() => {
                let Some(event) = event else {
                    info!("Device event stream ended");
                    break;
                };
                processed += 1;
                hub.publish_joystick(event);
                let resolution = resolver.resolve(event);
                apply(&mut sink, &resolution.pressed, &resolution.released);
            }
        }
    }

    let released = resolver.release_all();
    debug!(
        "Event loop processed {} events, releasing {} held outputs",
        processed,
        released.len()
    );
    apply(&mut sink, &[], &released);
    sink
}
