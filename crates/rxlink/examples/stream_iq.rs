//! Stream IQ samples from a receiver for a few seconds.
//!
//! Connects to the receiver's control port, tunes channel 0, starts the
//! sample stream and prints throughput once per second while printing
//! every session event.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p rxlink --example stream_iq -- 192.168.1.50:50000 1420405752
//! ```

use std::sync::Arc;
use std::time::Duration;

use rxlink::{
    SessionBuilder, SessionEvent, TcpControlChannel, TunerChannel, UdpDataChannel,
    UdpDataOptions, format_freq_mhz,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:50000".to_string());
    let frequency_hz: u64 = match args.next() {
        Some(f) => f.parse()?,
        None => 1_420_405_752,
    };

    let control = Arc::new(TcpControlChannel::new(&addr));
    let (data, mut samples) = UdpDataChannel::with_options(UdpDataOptions {
        bind_addr: "0.0.0.0:50001".to_string(),
        ..UdpDataOptions::default()
    })?;

    let session = SessionBuilder::new(control, Arc::new(data))
        .command_timeout(Duration::from_secs(2))
        .build()?;

    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::FrequencyChanged {
                    channel,
                    frequency_hz,
                } => println!("event: {} -> {}", channel, format_freq_mhz(frequency_hz)),
                other => println!("event: {:?}", other),
            }
        }
    });

    println!("Connecting to {}...", addr);
    session.connect().await?;
    session
        .change_frequency(frequency_hz, TunerChannel(0))
        .await?;
    session.start_streaming().await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut bytes = 0usize;
    let mut datagrams = 0usize;
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.tick().await;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            _ = tick.tick() => {
                println!("{:>6} datagrams {:>10} bytes", datagrams, bytes);
            }
            datagram = samples.recv() => match datagram {
                Some(d) => {
                    datagrams += 1;
                    bytes += d.len();
                }
                None => break,
            },
        }
    }

    session.stop_streaming().await?;
    session.disconnect();
    println!("Done: {} datagrams, {} bytes", datagrams, bytes);
    Ok(())
}
