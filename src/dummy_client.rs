//! A stand-in for a real array client. It connects to the collector and
//! streams records for a source position, with the delay computed from the
//! array's pose by the forward model plus optional noise.

use crate::{
    error::CalError,
    geometry::{angle_of_arrival, delay_for_angle, expected_angle},
    ArrayPose, Point,
};

use log::{debug, warn};
use rand::prelude::*;
use std::{
    io::Write,
    net::{TcpStream, ToSocketAddrs},
    sync::mpsc,
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

enum Signal {
    Source(Point),
    Noise(f64),
    Stop,
}

/// One fake array client running on its own thread.
pub struct DummyClient {
    handle: Option<thread::JoinHandle<()>>,
    tx: mpsc::Sender<Signal>,
}

/// The record an array at `pose` would send for a source at `source`, with
/// `noise` seconds of uniform jitter added to the delay.
pub fn synth_record(pose: &ArrayPose, speed_of_sound: f64, source: Point, noise: f64, rng: &mut impl Rng) -> String {
    let angle = expected_angle(pose.position, pose.theta, source);
    let mut delay = delay_for_angle(angle, pose.baseline, speed_of_sound);
    if noise > 0.0 {
        delay += rng.gen_range(-noise..noise);
    }
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.as_secs_f64())
        .unwrap_or(0.0);
    let phi = angle_of_arrival(delay, pose.baseline, speed_of_sound);
    format!(
        "{:.3},{},{},{:.6},0,{:e}\n",
        timestamp, pose.position.x, pose.position.y, phi, delay
    )
}

impl DummyClient {
    /// Connect to the collector at `addr` and start sending one record every
    /// `period` for a source at `source`.
    pub fn connect(
        addr: impl ToSocketAddrs,
        pose: ArrayPose,
        speed_of_sound: f64,
        source: Point,
        period: Duration,
    ) -> Result<Self, CalError> {
        let mut stream = TcpStream::connect(addr)?;
        let (tx, rx) = mpsc::channel::<Signal>();

        let handle = thread::Builder::new()
            .name(format!("dummy-array-{}", pose.array + 1))
            .spawn(move || {
                let mut rng = thread_rng();
                let mut source = source;
                let mut noise = 0.0;
                loop {
                    match rx.try_recv() {
                        Ok(Signal::Source(new_source)) => source = new_source,
                        Ok(Signal::Noise(new_noise)) => noise = new_noise,
                        Ok(Signal::Stop) | Err(mpsc::TryRecvError::Disconnected) => break,
                        Err(mpsc::TryRecvError::Empty) => {}
                    }
                    let record = synth_record(&pose, speed_of_sound, source, noise, &mut rng);
                    if let Err(e) = stream.write_all(record.as_bytes()) {
                        warn!("dummy array {}: collector went away: {}", pose.array + 1, e);
                        break;
                    }
                    thread::sleep(period);
                }
                debug!("dummy array {} stopped", pose.array + 1);
            })?;

        Ok(DummyClient {
            handle: Some(handle),
            tx,
        })
    }

    /// Move the simulated source.
    pub fn set_source(&self, source: Point) {
        self.send(Signal::Source(source));
    }

    /// Add up to `noise` seconds of uniform jitter to every delay.
    pub fn set_noise(&self, noise: f64) {
        self.send(Signal::Noise(noise));
    }

    // A send only fails once the thread has exited, which it logs itself.
    fn send(&self, signal: Signal) {
        let _ = self.tx.send(signal);
    }

    /// Stop sending and close the connection.
    pub fn stop(&mut self) {
        self.send(Signal::Stop);
        if let Some(thread) = self.handle.take() {
            if thread.join().is_err() {
                warn!("dummy client thread panicked");
            }
        }
    }
}

impl Drop for DummyClient {
    fn drop(&mut self) {
        self.stop();
    }
}
