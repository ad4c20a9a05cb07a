//! Control thread: applies deck commands and drives the fade timer.
//!
//! The loop runs on its own thread with a current-thread tokio runtime. Every
//! `tick` it advances each deck's fade and checks for transitions the render
//! side made on its own (end of track, render faults). Commands arrive over an
//! unbounded channel from any number of [`ControlHandle`]s and are answered
//! through a oneshot. Track loads go to the blocking pool so a slow decoder
//! never holds up the fade schedule.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::audio::{Deck, SourceReader};
use crate::error::{DeckError, LoadError, ValidationError};
use crate::logging::{DeckEventType, DeckLogger};
use crate::models::{DeckState, ReverbField, ReverbParameters};

pub type Reply = oneshot::Sender<Result<(), DeckError>>;

/// Something to do to one deck
pub enum DeckAction {
    Load(PathBuf),
    LoadSource(Box<dyn SourceReader>),
    Play,
    Stop,
    SetGain(f64),
    SetSpeed(f64),
    SetPosition(f64),
    SetPositionRelative(f64),
    SetReverb(ReverbParameters),
    SetReverbField(ReverbField, f32),
    ResetReverb,
    FadeIn,
    FadeOut,
    StopFade,
    SetFadeSpeed(f64),
    SetFadeRange { floor: f64, ceiling: f64 },
}

impl DeckAction {
    pub fn name(&self) -> &'static str {
        match self {
            DeckAction::Load(_) => "load",
            DeckAction::LoadSource(_) => "load source",
            DeckAction::Play => "play",
            DeckAction::Stop => "stop",
            DeckAction::SetGain(_) => "gain",
            DeckAction::SetSpeed(_) => "speed",
            DeckAction::SetPosition(_) => "position",
            DeckAction::SetPositionRelative(_) => "relative position",
            DeckAction::SetReverb(_) => "reverb",
            DeckAction::SetReverbField(..) => "reverb field",
            DeckAction::ResetReverb => "reverb reset",
            DeckAction::FadeIn => "fade in",
            DeckAction::FadeOut => "fade out",
            DeckAction::StopFade => "stop fade",
            DeckAction::SetFadeSpeed(_) => "fade speed",
            DeckAction::SetFadeRange { .. } => "fade range",
        }
    }
}

pub enum ControlCommand {
    Deck {
        deck: usize,
        action: DeckAction,
        reply: Reply,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable sender side of the control loop
#[derive(Clone)]
pub struct ControlHandle {
    sender: mpsc::UnboundedSender<ControlCommand>,
}

impl ControlHandle {
    fn dispatch(&self, deck: usize, action: DeckAction) -> Result<oneshot::Receiver<Result<(), DeckError>>, DeckError> {
        let (reply, receiver) = oneshot::channel();
        self.sender
            .send(ControlCommand::Deck { deck, action, reply })
            .map_err(|_| DeckError::Control("control loop has stopped".to_string()))?;
        Ok(receiver)
    }

    /// Send `action` to deck `deck` (zero-based) and wait for the outcome
    pub async fn send(&self, deck: usize, action: DeckAction) -> Result<(), DeckError> {
        let receiver = self.dispatch(deck, action)?;
        receiver
            .await
            .map_err(|_| DeckError::Control("command was dropped".to_string()))?
    }

    /// Blocking form of [`send`](Self::send) for callers outside any runtime
    pub fn send_blocking(&self, deck: usize, action: DeckAction) -> Result<(), DeckError> {
        let receiver = self.dispatch(deck, action)?;
        receiver
            .blocking_recv()
            .map_err(|_| DeckError::Control("command was dropped".to_string()))?
    }

    /// Queue `action` without waiting. The returned receiver resolves once it is applied.
    pub fn send_detached(
        &self,
        deck: usize,
        action: DeckAction,
    ) -> Result<oneshot::Receiver<Result<(), DeckError>>, DeckError> {
        self.dispatch(deck, action)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

pub struct ControlLoop {
    handle: ControlHandle,
    thread: Option<JoinHandle<()>>,
}

impl ControlLoop {
    /// Start the control thread for `decks`, ticking fades every `tick`
    pub fn start(decks: Vec<Arc<Deck>>, tick: Duration, logger: DeckLogger) -> Result<Self, DeckError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DeckError::Control(format!("failed to build runtime: {}", e)))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let tick = tick.max(Duration::from_millis(1));

        let thread = thread::Builder::new()
            .name("deck-control".to_string())
            .spawn(move || {
                runtime.block_on(run(decks, receiver, tick, logger));
                // Do not wait for loads still stuck in a decoder
                runtime.shutdown_timeout(Duration::from_millis(500));
                debug!("Control thread finished");
            })
            .map_err(|e| DeckError::Control(format!("failed to spawn control thread: {}", e)))?;

        Ok(Self {
            handle: ControlHandle { sender },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    /// Stop the loop and join its thread
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let (reply, done) = oneshot::channel();
        if self.handle.sender.send(ControlCommand::Shutdown { reply }).is_ok() {
            let _ = done.blocking_recv();
        }
        if thread.join().is_err() {
            error!("Control thread panicked");
        }
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Last state seen for a deck, to spot changes the render side makes by itself
#[derive(Clone, Copy)]
struct DeckWatch {
    state: DeckState,
    faults: u64,
}

async fn run(
    decks: Vec<Arc<Deck>>,
    mut receiver: mpsc::UnboundedReceiver<ControlCommand>,
    tick: Duration,
    logger: DeckLogger,
) {
    info!("Control loop started for {} decks, fade tick {:?}", decks.len(), tick);
    let mut watches: Vec<DeckWatch> = decks
        .iter()
        .map(|deck| DeckWatch { state: deck.state(), faults: deck.render_faults() })
        .collect();

    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            command = receiver.recv() => match command {
                Some(ControlCommand::Deck { deck, action, reply }) => {
                    match decks.get(deck) {
                        Some(target) => {
                            apply(target, action, reply, &logger);
                            watches[deck].state = target.state();
                        }
                        None => {
                            let _ = reply.send(Err(ValidationError::UnknownDeck { index: deck }.into()));
                        }
                    }
                }
                Some(ControlCommand::Shutdown { reply }) => {
                    info!("Control loop: shutdown requested");
                    let _ = reply.send(());
                    break;
                }
                None => {
                    info!("Control loop: all handles dropped");
                    break;
                }
            },
            _ = ticker.tick() => {
                for (deck, watch) in decks.iter().zip(watches.iter_mut()) {
                    deck.tick_fade();
                    observe(deck, watch, &logger);
                }
            }
        }
    }
}

fn observe(deck: &Deck, watch: &mut DeckWatch, logger: &DeckLogger) {
    let state = deck.state();
    // A load also stops the deck, but resets the position to 0
    if watch.state == DeckState::Playing && state == DeckState::Stopped && deck.get_position_relative() >= 1.0 {
        logger.log_event(deck.name(), DeckEventType::PlaybackStopped, "reached end of track");
    }
    watch.state = state;

    let faults = deck.render_faults();
    if faults > watch.faults {
        let cause = deck
            .take_render_fault()
            .map(|fault| format!(" ({})", fault))
            .unwrap_or_default();
        logger.log_event(
            deck.name(),
            DeckEventType::RenderFault,
            format!("{} block(s) replaced by silence{}", faults - watch.faults, cause),
        );
        watch.faults = faults;
    }
}

fn apply(deck: &Arc<Deck>, action: DeckAction, reply: Reply, logger: &DeckLogger) {
    let name = action.name();
    let result: Result<(), DeckError> = match action {
        DeckAction::Load(path) => {
            spawn_load(deck.clone(), path, reply, logger.clone());
            return;
        }
        DeckAction::LoadSource(source) => {
            let locator = source.locator().to_string();
            let result = deck.load_source(source);
            log_load(deck, &locator, &result, logger);
            result.map_err(DeckError::from)
        }
        DeckAction::Play => {
            if deck.play() {
                logger.log_event(deck.name(), DeckEventType::PlaybackStarted, deck.track().unwrap_or_default());
            } else {
                debug!("Deck {}: play ignored, nothing loaded", deck.name());
            }
            Ok(())
        }
        DeckAction::Stop => {
            deck.stop();
            logger.log_event(
                deck.name(),
                DeckEventType::PlaybackStopped,
                format!("stopped at {:.2}s", deck.get_position_seconds()),
            );
            Ok(())
        }
        DeckAction::SetGain(value) => {
            deck.set_gain(value);
            Ok(())
        }
        DeckAction::SetSpeed(ratio) => deck.set_speed(ratio).map_err(DeckError::from),
        DeckAction::SetPosition(seconds) => {
            deck.set_position(seconds);
            logger.log_event(deck.name(), DeckEventType::Seek, format!("to {:.2}s", deck.get_position_seconds()));
            Ok(())
        }
        DeckAction::SetPositionRelative(fraction) => deck
            .set_position_relative(fraction)
            .map(|()| {
                logger.log_event(deck.name(), DeckEventType::Seek, format!("to {:.1}%", fraction * 100.0));
            })
            .map_err(DeckError::from),
        DeckAction::SetReverb(params) => {
            deck.set_reverb_parameters(params);
            Ok(())
        }
        DeckAction::SetReverbField(field, value) => {
            deck.set_reverb_field(field, value);
            Ok(())
        }
        DeckAction::ResetReverb => {
            deck.reset_reverb();
            Ok(())
        }
        DeckAction::FadeIn => {
            deck.fade_in();
            logger.log_event(deck.name(), DeckEventType::FadeStarted, "fade in");
            Ok(())
        }
        DeckAction::FadeOut => {
            deck.fade_out();
            logger.log_event(deck.name(), DeckEventType::FadeStarted, "fade out");
            Ok(())
        }
        DeckAction::StopFade => {
            deck.stop_fade();
            logger.log_event(
                deck.name(),
                DeckEventType::FadeStopped,
                format!("gain held at {:.3}", deck.get_gain()),
            );
            Ok(())
        }
        DeckAction::SetFadeSpeed(speed) => deck.set_fade_speed(speed).map_err(DeckError::from),
        DeckAction::SetFadeRange { floor, ceiling } => deck.set_fade_range(floor, ceiling).map_err(DeckError::from),
    };

    if let Err(DeckError::Validation(e)) = &result {
        logger.log_event(deck.name(), DeckEventType::ParameterRejected, format!("{}: {}", name, e));
    }
    let _ = reply.send(result);
}

fn spawn_load(deck: Arc<Deck>, path: PathBuf, reply: Reply, logger: DeckLogger) {
    tokio::spawn(async move {
        let locator = path.display().to_string();
        let loader = deck.clone();
        let result = match tokio::task::spawn_blocking(move || loader.load_track(&path)).await {
            Ok(result) => {
                log_load(&deck, &locator, &result, &logger);
                result.map_err(DeckError::from)
            }
            Err(e) => Err(DeckError::Control(format!("load task failed: {}", e))),
        };
        let _ = reply.send(result);
    });
}

fn log_load(deck: &Deck, locator: &str, result: &Result<(), LoadError>, logger: &DeckLogger) {
    match result {
        Ok(()) => logger.log_event(
            deck.name(),
            DeckEventType::TrackLoaded,
            format!("{} ({:.2}s)", locator, deck.get_track_length_in_seconds()),
        ),
        Err(LoadError::Superseded { .. }) => {
            logger.log_event(deck.name(), DeckEventType::LoadSuperseded, locator)
        }
        Err(e) => logger.log_event(deck.name(), DeckEventType::LoadFailed, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::tests::{prepared_deck, GatedOpener};
    use crate::audio::PcmSource;
    use std::time::Instant;

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn start(opener: Arc<GatedOpener>) -> (ControlLoop, Vec<Arc<Deck>>, DeckLogger) {
        let decks = vec![
            prepared_deck("A", opener.clone(), 1_000, 64),
            prepared_deck("B", opener, 1_000, 64),
        ];
        let logger = DeckLogger::new();
        let control = ControlLoop::start(decks.clone(), Duration::from_millis(1), logger.clone()).unwrap();
        (control, decks, logger)
    }

    #[test]
    fn test_commands_reach_the_right_deck() {
        let (control, decks, _logger) = start(Arc::new(GatedOpener::new()));
        let handle = control.handle();

        handle.send_blocking(1, DeckAction::Load(PathBuf::from("0.5.pcm"))).unwrap();
        handle.send_blocking(1, DeckAction::Play).unwrap();
        handle.send_blocking(1, DeckAction::SetGain(0.4)).unwrap();
        handle.send_blocking(1, DeckAction::SetReverbField(ReverbField::Width, 0.2)).unwrap();

        assert_eq!(decks[1].state(), DeckState::Playing);
        assert_eq!(decks[1].get_gain(), 0.4);
        assert_eq!(decks[1].reverb_parameters().width, 0.2);
        assert_eq!(decks[0].state(), DeckState::Empty);
        assert_eq!(decks[0].get_gain(), 1.0);
    }

    #[test]
    fn test_rejections_are_reported_and_logged() {
        let (control, decks, logger) = start(Arc::new(GatedOpener::new()));
        let handle = control.handle();

        let err = handle.send_blocking(0, DeckAction::SetSpeed(0.0)).unwrap_err();
        assert!(matches!(err, DeckError::Validation(ValidationError::SpeedOutOfRange { .. })));
        assert_eq!(decks[0].speed(), 1.0);

        let err = handle.send_blocking(5, DeckAction::Play).unwrap_err();
        assert!(matches!(err, DeckError::Validation(ValidationError::UnknownDeck { index: 5 })));

        let err = handle.send_blocking(0, DeckAction::Load(PathBuf::from("loud.pcm"))).unwrap_err();
        assert!(matches!(err, DeckError::Load(LoadError::UnsupportedFormat { .. })));

        assert_eq!(logger.event_count(DeckEventType::ParameterRejected), 1);
        assert_eq!(logger.event_count(DeckEventType::LoadFailed), 1);
    }

    #[test]
    fn test_fade_ticks_run_on_schedule() {
        let (control, decks, _logger) = start(Arc::new(GatedOpener::new()));
        let handle = control.handle();

        handle.send_blocking(0, DeckAction::SetGain(0.0)).unwrap();
        handle.send_blocking(0, DeckAction::SetFadeSpeed(0.25)).unwrap();
        handle.send_blocking(0, DeckAction::FadeIn).unwrap();
        assert!(wait_for(|| decks[0].get_gain() == 1.0));

        handle.send_blocking(0, DeckAction::SetFadeRange { floor: 0.5, ceiling: 1.0 }).unwrap();
        handle.send_blocking(0, DeckAction::FadeOut).unwrap();
        assert!(wait_for(|| decks[0].get_gain() == 0.5));
        assert!(decks[0].is_fading_out());
    }

    #[test]
    fn test_slow_load_does_not_block_fades_and_is_superseded() {
        let opener = Arc::new(GatedOpener::new());
        let release = opener.gate("0.1.pcm");
        let (control, decks, logger) = start(opener.clone());
        let handle = control.handle();

        let first = handle.send_detached(0, DeckAction::Load(PathBuf::from("0.1.pcm"))).unwrap();
        assert!(wait_for(|| opener.opened() == 1));

        // The fade timer keeps running while the first load is stuck
        handle.send_blocking(0, DeckAction::SetGain(0.0)).unwrap();
        handle.send_blocking(0, DeckAction::SetFadeSpeed(0.5)).unwrap();
        handle.send_blocking(0, DeckAction::FadeIn).unwrap();
        assert!(wait_for(|| decks[0].get_gain() == 1.0));

        handle.send_blocking(0, DeckAction::Load(PathBuf::from("0.9.pcm"))).unwrap();
        release.send(()).unwrap();
        let first_result = first.blocking_recv().unwrap();
        assert!(matches!(first_result, Err(DeckError::Load(LoadError::Superseded { .. }))));

        assert_eq!(decks[0].track().as_deref(), Some("0.9.pcm"));
        assert_eq!(logger.event_count(DeckEventType::LoadSuperseded), 1);
        assert_eq!(logger.event_count(DeckEventType::TrackLoaded), 1);
    }

    #[test]
    fn test_end_of_track_is_logged() {
        let (control, decks, logger) = start(Arc::new(GatedOpener::new()));
        let handle = control.handle();

        let source = PcmSource::constant(0.3, 0.05, 2, 1_000);
        handle.send_blocking(0, DeckAction::LoadSource(Box::new(source))).unwrap();
        handle.send_blocking(0, DeckAction::Play).unwrap();

        let mut block = crate::models::AudioBlock::with_capacity(2, 64);
        decks[0].pull_block(&mut block, 64);
        assert_eq!(decks[0].state(), DeckState::Stopped);
        assert!(wait_for(|| logger.event_count(DeckEventType::PlaybackStopped) == 1));
    }

    #[test]
    fn test_render_fault_is_logged_with_its_cause() {
        let (_control, decks, logger) = start(Arc::new(GatedOpener::new()));

        // mono block into a stereo deck
        let mut block = crate::models::AudioBlock::with_capacity(1, 64);
        decks[1].pull_block(&mut block, 64);
        assert!(block.is_silent());
        assert!(wait_for(|| logger.event_count(DeckEventType::RenderFault) == 1));

        let events = logger.get_recent_events(10);
        let fault = events
            .iter()
            .find(|event| event.event_type == DeckEventType::RenderFault)
            .unwrap();
        assert_eq!(fault.deck, "B");
        assert!(fault.details.starts_with("1 block(s) replaced by silence"));
        assert!(fault.details.contains("Malformed block"));
        assert!(decks[1].take_render_fault().is_none());
    }

    #[test]
    fn test_async_send_and_shutdown() {
        let (mut control, decks, _logger) = start(Arc::new(GatedOpener::new()));
        let handle = control.handle();

        tokio_test::block_on(handle.send(0, DeckAction::Load(PathBuf::from("0.3.pcm")))).unwrap();
        tokio_test::block_on(handle.send(0, DeckAction::SetPositionRelative(0.5))).unwrap();
        assert!((decks[0].get_position_relative() - 0.5).abs() < 1e-9);
        assert!(tokio_test::block_on(handle.send(0, DeckAction::SetPositionRelative(2.0))).is_err());

        control.shutdown();
        assert!(wait_for(|| handle.is_closed()));
        assert!(matches!(
            handle.send_blocking(0, DeckAction::Play),
            Err(DeckError::Control(_))
        ));
    }
}
