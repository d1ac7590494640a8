use std::env;
use std::time::Duration;

use livebox_tv::{Country, Event, LiveboxClient};

#[tokio::main]
async fn main() -> livebox_tv::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let host = args.get(1).expect("usage: monitor <host> [poland]");
    let country = if args.iter().any(|a| a == "poland") {
        Country::Poland
    } else {
        Country::France
    };

    let client = LiveboxClient::builder(host)
        .country(country)
        .on_event(|event| match event {
            Event::Connected { device_id } => println!("[{device_id}] connected"),
            Event::Disconnected { device_id } => println!("[{device_id}] disconnected"),
            Event::Updated { device_id, delta } => println!("[{device_id}] {delta:?}"),
        })
        .build();

    println!("Connecting to {host}...");
    client.connect()?;
    client.start_polling();
    println!("Connected. Polling for updates...");

    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        let snap = client.snapshot();
        println!(
            "{:?} | {} | {} | {}s/{}s",
            snap.power,
            snap.channel_name.as_deref().unwrap_or("-"),
            snap.program_title().as_deref().unwrap_or("-"),
            snap.position,
            snap.duration,
        );
        if !client.is_polling() {
            println!("Poll loop stopped (device off). Restarting...");
            client.start_polling();
        }
    }
}
