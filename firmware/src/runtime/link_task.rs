use core::fmt::Write as _;

use embassy_time::Instant;
use heapless::Vec;

use super::{Acquisition, LINK_COUNTERS, LINK_RX, LINK_TX, LinkInput, SharedAcquisition, WAKE_CHANGED, tick_at};
use crate::link::{DriverLines, LineHandler, LineSession, LinkFrame, Response, encode_line};

/// Locks the shared driver for the duration of one command line.
struct SharedDriverLines {
    shared: &'static SharedAcquisition,
}

impl LineHandler for SharedDriverLines {
    fn handle_line(&mut self, line: &str, response: &mut Response) {
        let now = tick_at(Instant::now());
        self.shared.lock(|cell| {
            let mut acquisition = cell.borrow_mut();
            let Acquisition { executor, gpio } = &mut *acquisition;
            DriverLines {
                executor,
                gpio,
                counters: &LINK_COUNTERS,
                now,
            }
            .handle_line(line, response);
        });
        WAKE_CHANGED.signal(());
    }
}

#[embassy_executor::task]
pub async fn run(shared: &'static SharedAcquisition) -> ! {
    let mut session = LineSession::new(SharedDriverLines { shared });
    let mut response = Response::new();

    loop {
        let frame = match LINK_RX.receive().await {
            LinkInput::Connected => {
                session.on_connect();
                continue;
            }
            LinkInput::Disconnected => {
                session.on_disconnect();
                continue;
            }
            LinkInput::Data(frame) => frame,
        };

        for byte in frame {
            match session.ingest(byte, &mut response) {
                Ok(true) => send_line(&response).await,
                Ok(false) => {}
                Err(err) => {
                    defmt::warn!("link: {}", err);
                    let mut reply = Response::new();
                    let _ = write!(reply, "error {err}");
                    send_line(&reply).await;
                }
            }
        }
    }
}

async fn send_line(line: &str) {
    let mut frames: Vec<LinkFrame, 2> = Vec::new();
    encode_line(line, |frame| {
        let _ = frames.push(frame);
    });
    for frame in frames {
        LINK_TX.send(frame).await;
    }
}
