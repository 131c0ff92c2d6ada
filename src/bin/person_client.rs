use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use futures::{Stream, StreamExt};
use person_client::proto::{ListPersonRequest, PersonRequest, PersonResponse};
use person_client::{ClientConfig, PersonServiceClient};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CallKind {
    /// GetPersonInformation
    Unary,
    /// ListPersons
    ServerStream,
    /// SavePersons
    ClientStream,
    /// ExchangePersons
    Bidi,
    /// Every call shape in turn
    All,
}

impl CallKind {
    fn includes(self, other: CallKind) -> bool {
        self == CallKind::All || self == other
    }
}

/// Drive the person service through each call shape.
#[derive(Debug, Parser)]
#[command(name = "person-client", version)]
struct Cli {
    /// The server address in the format of host:port
    #[arg(long, env = "PERSON_SERVER_ADDR", default_value = "localhost:8081")]
    addr: String,

    /// Which call shape to run
    #[arg(long, value_enum, default_value = "all")]
    call: CallKind,

    /// Pause between streamed requests (e.g., 1s, 250ms)
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    send_interval: Duration,

    /// Connection timeout (e.g., 5s)
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    connect_timeout: Duration,

    /// Number of persons sent on streaming calls
    #[arg(long, default_value = "3")]
    count: i32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::new(cli.addr.clone())
        .with_connect_timeout(cli.connect_timeout)
        .with_send_interval(cli.send_interval);

    info!(addr = %config.addr, "Connecting to person service");
    let client = PersonServiceClient::connect(config).await?;
    info!(addr = %client.channel().addr(), "Connected");

    let mut failed = 0;

    if cli.call.includes(CallKind::Unary) {
        info!("Unary RPC!!");
        if let Err(e) = run_unary(&client).await {
            error!(error = %e, "GetPersonInformation failed");
            failed += 1;
        }
    }

    if cli.call.includes(CallKind::ServerStream) {
        info!("Server Streaming RPC!!");
        if let Err(e) = run_server_stream(&client).await {
            error!(error = %e, "ListPersons failed");
            failed += 1;
        }
    }

    if cli.call.includes(CallKind::ClientStream) {
        info!("Client Streaming RPC!!");
        if let Err(e) = run_client_stream(&client, cli.count).await {
            error!(error = %e, "SavePersons failed");
            failed += 1;
        }
    }

    if cli.call.includes(CallKind::Bidi) {
        info!("Bidirectional Streaming RPC!!");
        if let Err(e) = run_bidi(&client, cli.count).await {
            error!(error = %e, "ExchangePersons failed");
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{failed} call(s) failed");
    }
    Ok(())
}

fn sample_person(n: i32) -> PersonRequest {
    PersonRequest {
        name: format!("name{n}"),
        age: n,
        email: format!("email{n}@test.com"),
        password: format!("password{n}"),
    }
}

/// `count` sample persons, one every `interval`.
fn paced_persons(count: i32, interval: Duration) -> impl Stream<Item = PersonRequest> + Send {
    async_stream::stream! {
        for n in 1..=count {
            if n > 1 {
                tokio::time::sleep(interval).await;
            }
            yield sample_person(n);
        }
    }
}

fn log_sending(request: &PersonRequest) {
    info!(
        "Sending request to save person (name: {}, age: {}, email: {})",
        request.name, request.age, request.email
    );
}

fn log_response(response: &PersonResponse) {
    info!(
        "Response: Person(name: {}, message: {})",
        response.name, response.message
    );
}

async fn run_unary(client: &PersonServiceClient) -> Result<()> {
    let request = PersonRequest {
        name: "Sangwoo".to_string(),
        age: 25,
        email: "robbyra@gmail.com".to_string(),
        password: "sangwooPassword".to_string(),
    };
    log_sending(&request);

    let response = client.get_person_information(request).await?;
    log_response(&response);
    Ok(())
}

async fn run_server_stream(client: &PersonServiceClient) -> Result<()> {
    let request = ListPersonRequest {
        email: "robbyra@gmail.com".to_string(),
    };
    info!("Sending request to get all persons with email: {}", request.email);

    let mut call = client.list_persons(request);
    while let Some(person) = call.message().await? {
        info!("Response: Person(name: {}, age: {})", person.name, person.age);
    }
    info!(received = call.received(), "Server stream finished");
    Ok(())
}

async fn run_client_stream(client: &PersonServiceClient, count: i32) -> Result<()> {
    let interval = client.config().send_interval;
    let mut call = client.save_persons();

    let persons = paced_persons(count, interval);
    futures::pin_mut!(persons);
    while let Some(person) = persons.next().await {
        log_sending(&person);
        call.send(person).await?;
    }

    let response = call.close_and_receive().await?;
    log_response(&response);
    Ok(())
}

async fn run_bidi(client: &PersonServiceClient, count: i32) -> Result<()> {
    let interval = client.config().send_interval;
    let call = client.exchange_persons();
    info!(call_id = %call.call_id(), "Exchanging persons");
    let (sender, mut receiver, completion) = call.split();

    let send_loop = async move {
        let persons = paced_persons(count, interval).inspect(log_sending);
        sender.send_all(persons).await
    };

    let receive_loop = async move {
        while let Some(person) = receiver.message().await? {
            info!("Response: Person(name: {}, age: {})", person.name, person.age);
        }
        Ok::<_, person_client::CallError>(receiver.received())
    };

    let (sent, received) = tokio::join!(send_loop, receive_loop);
    completion.wait().await?;
    let (sent, received) = (sent?, received?);
    info!(sent, received, "Exchange finished");
    Ok(())
}
