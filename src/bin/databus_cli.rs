//! Command-line tooling for the bus: run a broker, publish/subscribe
//! against one over TCP, watch live throughput, or benchmark the
//! in-process fan-out path. Grounded on
//! `examples/lvzzzx-chronicle-rs/src/bin/chronicle_cli.rs` (clap
//! derive subcommands, a `ratatui`/`crossterm` live monitor) and
//! `crates/chronicle-cli/src/monitor.rs` (terminal setup/teardown,
//! periodic redraw loop).

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyCode};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use databus::bus::DataBus;
use databus::broker::Broker;
use databus::bus_client::BusClient;
use databus::codec::{CodecRegistry, RawBytesCodec};
use databus::error::Error;
use ratatui::prelude::*;
use ratatui::widgets::*;

#[derive(Parser)]
#[command(name = "databus-cli", version, about = "Publish/subscribe data bus tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a broker: bind a TCP listener and re-export an in-process bus.
    Serve {
        #[arg(long, default_value = "127.0.0.1:7878")]
        addr: String,
    },
    /// Publish one JSON-encoded value to a topic on a remote broker.
    Publish {
        #[arg(long)]
        addr: String,
        #[arg(long)]
        topic: String,
        #[arg(long, default_value = "Json")]
        data_type: String,
        /// JSON-encoded payload, e.g. '{"id":1,"name":"p1"}'
        json: String,
    },
    /// Subscribe to a topic on a remote broker and print every message.
    Subscribe {
        #[arg(long)]
        addr: String,
        #[arg(long)]
        topic: String,
        #[arg(long, default_value = "cli")]
        name: String,
    },
    /// Live throughput view for a topic on a remote broker.
    Monitor {
        #[arg(long)]
        addr: String,
        #[arg(long)]
        topic: String,
        #[arg(long, default_value_t = 250)]
        interval_ms: u64,
    },
    /// In-process fan-out benchmark: N subscribers, M publishes each.
    Bench {
        #[arg(long, default_value_t = 4)]
        subscribers: usize,
        #[arg(long, default_value_t = 100_000)]
        messages: u64,
        #[arg(long, default_value_t = 1024)]
        queue_size: usize,
    },
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { addr } => cmd_serve(&addr).await,
        Commands::Publish {
            addr,
            topic,
            data_type,
            json,
        } => cmd_publish(&addr, &topic, &data_type, &json).await,
        Commands::Subscribe { addr, topic, name } => cmd_subscribe(&addr, &topic, &name).await,
        Commands::Monitor { addr, topic, interval_ms } => cmd_monitor(&addr, &topic, interval_ms).await,
        Commands::Bench {
            subscribers,
            messages,
            queue_size,
        } => cmd_bench(subscribers, messages, queue_size),
    }
}

async fn cmd_serve(addr: &str) -> Result<()> {
    let bus = Arc::new(DataBus::new());
    // No topic schemas known ahead of time from the command line, so every
    // topic bridges opaquely via `BridgedPayload` rather than a registered
    // native type.
    let broker = Broker::new(Arc::clone(&bus), Arc::new(CodecRegistry::new()));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("databus broker listening on {addr}");
    broker.listen(listener).await?;
    Ok(())
}

async fn cmd_publish(addr: &str, topic: &str, data_type: &str, json: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let encoded = serde_json::to_vec(&value)?;
    let client = BusClient::connect(addr).await?;
    client.publish(topic, &encoded, &RawBytesCodec::new(data_type)).await?;
    println!("published to topic={topic:?} on {addr}");
    Ok(())
}

async fn cmd_subscribe(addr: &str, topic: &str, name: &str) -> Result<()> {
    let client = BusClient::connect(addr).await?;
    client
        .subscribe::<serde_json::Value, _>(
            topic,
            name,
            64,
            |bytes| serde_json::from_slice(bytes).map_err(|e| Error::Codec(e.to_string())),
            |value| println!("{value}"),
            false,
            0,
        )
        .await?;
    println!("subscribed to topic={topic:?} on {addr}, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    Ok(())
}

async fn cmd_monitor(addr: &str, topic: &str, interval_ms: u64) -> Result<()> {
    let received: Arc<AtomicU64> = Arc::new(AtomicU64::new(0));
    let received_for_cb = Arc::clone(&received);
    let client = BusClient::connect(addr).await?;
    client
        .subscribe::<serde_json::Value, _>(
            topic,
            "monitor",
            1024,
            |bytes| serde_json::from_slice(bytes).map_err(|e| Error::Codec(e.to_string())),
            move |_value| {
                received_for_cb.fetch_add(1, Ordering::Relaxed);
            },
            false,
            0,
        )
        .await?;

    let interval = Duration::from_millis(interval_ms);
    let topic_owned = topic.to_string();
    tokio::task::spawn_blocking(move || run_monitor_ui(&received, topic_owned, interval)).await??;
    Ok(())
}

fn run_monitor_ui(received: &AtomicU64, topic: String, interval: Duration) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = monitor_loop(&mut terminal, received, &topic, interval);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

fn monitor_loop<B: Backend>(
    terminal: &mut Terminal<B>,
    received: &AtomicU64,
    topic: &str,
    interval: Duration,
) -> Result<()> {
    let mut last_count = 0u64;
    let mut last_tick = Instant::now();
    let mut rate = 0.0;

    loop {
        if last_tick.elapsed() >= interval {
            let count = received.load(Ordering::Relaxed);
            rate = (count - last_count) as f64 / last_tick.elapsed().as_secs_f64();
            last_count = count;
            last_tick = Instant::now();
            terminal.draw(|f| ui(f, topic, count, rate))?;
        }

        if event::poll(Duration::from_millis(10))? {
            if let Event::Key(key) = event::read()? {
                if key.code == KeyCode::Char('q') {
                    return Ok(());
                }
            }
        }
    }
}

fn ui(f: &mut Frame, topic: &str, count: u64, rate: f64) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(f.size());

    let title = Paragraph::new(format!("databus monitor: {topic}"))
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Green)));
    f.render_widget(title, chunks[0]);

    let body = vec![
        Line::from(vec![
            Span::raw("Received: "),
            Span::styled(format!("{count}"), Style::default().fg(Color::Cyan)),
        ]),
        Line::from(vec![
            Span::raw("Rate:     "),
            Span::styled(format!("{rate:.0} msg/s"), Style::default().fg(Color::Yellow)),
        ]),
        Line::from(""),
        Line::from("Press 'q' to quit."),
    ];
    let body = Paragraph::new(body).block(Block::default().title("Stats").borders(Borders::ALL));
    f.render_widget(body, chunks[1]);
}

fn cmd_bench(subscribers: usize, messages: u64, queue_size: usize) -> Result<()> {
    let bus = DataBus::new();
    let counters: Vec<_> = (0..subscribers).map(|_| Arc::new(AtomicU64::new(0))).collect();
    for (i, counter) in counters.iter().enumerate() {
        let counter = Arc::clone(counter);
        bus.subscribe::<u64, _>(
            "bench",
            &format!("sub-{i}"),
            queue_size,
            move |_msg| {
                counter.fetch_add(1, Ordering::Relaxed);
            },
        )?;
    }

    let start = Instant::now();
    for i in 0..messages {
        bus.publish("bench", i)?;
    }
    let publish_elapsed = start.elapsed();

    loop {
        let drained = counters.iter().all(|c| c.load(Ordering::Relaxed) >= messages);
        if drained {
            break;
        }
        // A full queue drops instead of blocking (`RingQueue::put`), so a
        // subscriber's own counter can stall short of `messages` forever;
        // cross-check against dropped_count too so a saturated bench still
        // terminates instead of hanging.
        let topic_stat = bus.stats().into_iter().find(|s| s.topic == "bench");
        let accounted_for = topic_stat.is_some_and(|stat| {
            stat.subscribers
                .iter()
                .all(|sub| sub.success_count + sub.dropped_count >= messages)
        });
        if accounted_for {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    let total_elapsed = start.elapsed();

    let stats = bus.stats();
    let topic_stat = stats.into_iter().find(|s| s.topic == "bench").unwrap();
    println!(
        "published {messages} messages to {subscribers} subscribers in {publish_elapsed:?} (publish-only), {total_elapsed:?} (drained)"
    );
    for sub in topic_stat.subscribers {
        println!(
            "  {} id={} incoming={} success={} dropped={}",
            sub.subscriber_name, sub.subscriber_id, sub.incoming_count, sub.success_count, sub.dropped_count
        );
    }
    Ok(())
}
