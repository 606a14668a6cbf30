//! A [`SourceMeter`](crate::SourceMeter) owned by its own thread.
//!
//! The driver blocks on the socket, so async callers talk to it through a
//! channel. Requests are executed in order and answered over a oneshot.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::oneshot;
use tokio::task::spawn_blocking;

use crate::address::Address;
use crate::configurable::Configurable;
use crate::keithley::{SourceMeter as BlockingSourceMeter, State};
use crate::options::Options;
use crate::protocol::{SourceMeterRequest, SourceMeterResponse};
use crate::transport::Transport;
use crate::Error;

type Driver = BlockingSourceMeter<Configurable<Box<dyn Transport + Send>>>;

struct Thread {
    smu: Driver,
    rx: mpsc::Receiver<Msg>,
}

#[derive(Clone)]
pub struct SourceMeter {
    tx: mpsc::Sender<Msg>,
}

enum Msg {
    Request {
        request: SourceMeterRequest,
        reply: oneshot::Sender<crate::Result<SourceMeterResponse>>,
    },
    Snapshot {
        reply: oneshot::Sender<State>,
    },
    Drop,
}

fn disconnected() -> Error {
    Error::transport(anyhow!("instrument thread is gone"))
}

impl SourceMeter {
    pub async fn connect(addr: Address, timeout: Duration, options: Options) -> crate::Result<SourceMeter> {
        let transport = spawn_blocking(move || addr.open(timeout))
            .await
            .map_err(Error::internal)??;
        Ok(Self::spawn(BlockingSourceMeter::new(transport, options)))
    }

    pub fn spawn(smu: Driver) -> SourceMeter {
        let (tx, rx) = mpsc::channel();

        let mut thread = Thread { smu, rx };
        thread::spawn(move || {
            while let Ok(msg) = thread.rx.recv() {
                if !thread.handle_msg(msg) {
                    break;
                }
            }
            log::debug!("Instrument thread stopped");
        });

        SourceMeter { tx }
    }

    pub async fn handle(&self, req: SourceMeterRequest) -> crate::Result<SourceMeterResponse> {
        let (tx, rx) = oneshot::channel();
        let msg = Msg::Request {
            request: req,
            reply: tx,
        };
        self.tx.send(msg).map_err(|_| disconnected())?;
        rx.await.map_err(|_| disconnected())?
    }

    pub async fn snapshot(&self) -> crate::Result<State> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Msg::Snapshot { reply: tx })
            .map_err(|_| disconnected())?;
        rx.await.map_err(|_| disconnected())
    }

    /// Stop the instrument thread. Requests queued before are still executed.
    pub fn disconnect(self) {
        let _ = self.tx.send(Msg::Drop);
    }
}

impl Thread {
    fn handle_msg(&mut self, msg: Msg) -> bool {
        match msg {
            Msg::Request { request, reply } => {
                let _ = reply.send(self.smu.handle(request));
                true
            }
            Msg::Snapshot { reply } => {
                let _ = reply.send(self.smu.snapshot());
                true
            }
            Msg::Drop => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ScpiRequest, ScpiResponse};

    #[tokio::test]
    async fn requests_run_on_thread() {
        let smu = SourceMeter::connect(Address::Loopback, Duration::from_secs(1), Options::no_ramp())
            .await
            .unwrap();
        let other = smu.clone();

        smu.handle(SourceMeterRequest::SetCurrentSourceMode {
            protection_voltage: 2.0,
        })
        .await
        .unwrap();
        other.handle(SourceMeterRequest::SetCurrent(0.01)).await.unwrap();
        let ret = smu.handle(SourceMeterRequest::GetCurrent).await.unwrap();
        assert_eq!(ret, SourceMeterResponse::Value(0.01));

        let ret = other
            .handle(SourceMeterRequest::Scpi(ScpiRequest::QueryString("VOLT:PROT?".to_string())))
            .await
            .unwrap();
        assert_eq!(ret, SourceMeterResponse::Scpi(ScpiResponse::String("2".to_string())));

        let state = smu.snapshot().await.unwrap();
        assert_eq!(state.latest_current, 0.01);
    }

    #[tokio::test]
    async fn errors_are_forwarded() {
        let transport: Box<dyn Transport + Send> = Box::new(crate::transport::Loopback::new());
        let smu = SourceMeter::spawn(BlockingSourceMeter::new(transport, Options::default()));
        let err = smu.handle(SourceMeterRequest::SetVoltage(f64::NAN)).await.unwrap_err();
        assert!(err.is_argument());
    }

    #[tokio::test]
    async fn disconnected_handle_fails() {
        let smu = SourceMeter::connect(Address::Loopback, Duration::from_secs(1), Options::default())
            .await
            .unwrap();
        let other = smu.clone();
        smu.disconnect();
        let err = other.handle(SourceMeterRequest::Identify).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
