//! Scripted connector for unit tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::transport::connection::{Connection, Connector, RpcCall, RpcReply, TransportError};

/// How calls on mock connections behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallBehavior {
    /// Reply with the request payload.
    Echo,
    /// Fail with a remote 500.
    Fail,
    /// Never reply.
    Hang,
    /// Reject the request as over the message limit before sending.
    Oversized,
}

#[derive(Debug)]
struct Script {
    dialed: Vec<String>,
    dial_delay: Duration,
    refuse_dials: bool,
    calls: CallBehavior,
    connections: Vec<Arc<AtomicBool>>,
}

#[derive(Debug, Clone)]
pub struct MockConnector {
    script: Arc<Mutex<Script>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                dialed: Vec::new(),
                dial_delay: Duration::ZERO,
                refuse_dials: false,
                calls: CallBehavior::Echo,
                connections: Vec::new(),
            })),
        }
    }

    pub fn dial_count(&self) -> usize {
        self.script.lock().unwrap().dialed.len()
    }

    pub fn dialed(&self) -> Vec<String> {
        self.script.lock().unwrap().dialed.clone()
    }

    pub fn set_dial_delay(&self, delay: Duration) {
        self.script.lock().unwrap().dial_delay = delay;
    }

    pub fn refuse_dials(&self, refuse: bool) {
        self.script.lock().unwrap().refuse_dials = refuse;
    }

    pub fn set_calls(&self, behavior: CallBehavior) {
        self.script.lock().unwrap().calls = behavior;
    }

    /// Mark every connection handed out so far as broken.
    pub fn break_connections(&self) {
        for healthy in &self.script.lock().unwrap().connections {
            healthy.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self, address: &str) -> Result<MockConnection, TransportError> {
        let (delay, refuse) = {
            let mut script = self.script.lock().unwrap();
            script.dialed.push(address.to_string());
            (script.dial_delay, script.refuse_dials)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if refuse {
            return Err(TransportError::Connect(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )));
        }

        let healthy = Arc::new(AtomicBool::new(true));
        self.script.lock().unwrap().connections.push(healthy.clone());
        Ok(MockConnection {
            address: address.to_string(),
            healthy,
            script: self.script.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MockConnection {
    address: String,
    healthy: Arc<AtomicBool>,
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl Connection for MockConnection {
    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn call(&self, call: RpcCall) -> Result<RpcReply, TransportError> {
        let behavior = self.script.lock().unwrap().calls;
        match behavior {
            CallBehavior::Echo => Ok(RpcReply {
                payload: call.payload,
            }),
            CallBehavior::Fail => Err(TransportError::Remote {
                status: 500,
                message: format!("{} failed on {}", call.method, self.address),
            }),
            CallBehavior::Hang => std::future::pending().await,
            CallBehavior::Oversized => Err(TransportError::RequestTooLarge {
                size: call.payload.to_string().len(),
                limit: 8,
            }),
        }
    }
}
