// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Finite stream of records produced by a background discovery task.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use printseek_core::types::PrinterRecord;

/// Capacity of the channel behind every record stream.
pub(crate) const STREAM_CAPACITY: usize = 64;

/// Records as they become ready.  Ends when the producing task finishes.
#[derive(Debug)]
pub struct RecordStream {
    rx: mpsc::Receiver<PrinterRecord>,
}

impl RecordStream {
    pub(crate) fn new(rx: mpsc::Receiver<PrinterRecord>) -> Self {
        Self { rx }
    }

    /// A stream paired with the sender that feeds it.
    pub(crate) fn channel() -> (mpsc::Sender<PrinterRecord>, Self) {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        (tx, Self::new(rx))
    }

    /// A stream that is already finished.
    pub fn empty() -> Self {
        let (_, stream) = Self::channel();
        stream
    }

    /// Next record, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<PrinterRecord> {
        self.rx.recv().await
    }
}

impl Stream for RecordStream {
    type Item = PrinterRecord;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
