//! Command-line entry point.
//!
//! Usage:
//!   palaver server [--host HOST] [--port PORT]
//!   palaver client <name> [--host HOST] [--port PORT] [--keepalive SECS]

use std::env;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use palaver::{ChatClient, ChatServer, ClientConfig, Response, ServerConfig, GENERAL_ROOM};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let args: Vec<String> = env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("server") => run_server(&args[2..]).await,
        Some("client") => run_client(&args[2..]).await,
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("palaver - TCP multi-user chat broker");
    println!();
    println!("USAGE:");
    println!("    palaver server [--host HOST] [--port PORT]");
    println!("    palaver client <name> [--host HOST] [--port PORT] [--keepalive SECS]");
    println!();
    println!("OPTIONS:");
    println!("    --host HOST          chat server hostname (default: localhost)");
    println!("    --port PORT          chat server port number (default: 5555)");
    println!("    --keepalive SECS     keepalive cadence, 1-30 (default: 15)");
    println!();
    println!("CLIENT COMMANDS:");
    println!("    /rooms [user]        list rooms, or the rooms a user is in");
    println!("    /users [room]        list users, or the members of a room");
    println!("    /create <room>       create a room");
    println!("    /join <room>         join a room and make it current");
    println!("    /leave <room>        leave a room");
    println!("    /msg <user> <text>   message a user directly");
    println!("    /quit                disconnect");
    println!("    anything else is sent to the current room");
}

fn flag_value(iter: &mut std::slice::Iter<'_, String>, flag: &str) -> anyhow::Result<String> {
    iter.next()
        .cloned()
        .with_context(|| format!("missing value for {}", flag))
}

async fn run_server(args: &[String]) -> anyhow::Result<()> {
    let mut config = ServerConfig::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--host" => config.host = flag_value(&mut iter, "--host")?,
            "--port" => {
                config.port = flag_value(&mut iter, "--port")?
                    .parse()
                    .context("invalid --port")?;
            }
            other => bail!("unknown server option: {}", other),
        }
    }

    let server = ChatServer::bind(config).await?;
    server.run().await?;
    Ok(())
}

async fn run_client(args: &[String]) -> anyhow::Result<()> {
    let mut config = ClientConfig::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--name" => config.name = flag_value(&mut iter, "--name")?,
            "--host" => config.host = flag_value(&mut iter, "--host")?,
            "--port" => {
                config.port = flag_value(&mut iter, "--port")?
                    .parse()
                    .context("invalid --port")?;
            }
            "--keepalive" => {
                let secs: u64 = flag_value(&mut iter, "--keepalive")?
                    .parse()
                    .context("invalid --keepalive")?;
                config.keepalive = Duration::from_secs(secs);
            }
            other if !other.starts_with("--") && config.name.is_empty() => {
                config.name = other.to_string();
            }
            other => bail!("unknown client option: {}", other),
        }
    }
    if config.name.is_empty() {
        print_usage();
        bail!("missing display name");
    }

    println!("connecting to {}:{}", config.host, config.port);
    let (client, mut events) = ChatClient::connect(config).await?;
    println!("connected.");
    println!();

    let (line_tx, mut lines) = mpsc::channel(1);
    tokio::spawn(async move {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = stdin.next_line().await {
            if line_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let mut current = GENERAL_ROOM.to_string();
    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                if !handle_line(&client, &mut current, line.trim()).await? {
                    break;
                }
            }
            event = events.recv() => {
                let Some(response) = event else {
                    println!("server closed the connection.");
                    break;
                };
                let fatal = response.is_fatal();
                render(&response);
                if fatal {
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Apply one input line; false ends the client loop.
async fn handle_line(client: &ChatClient, current: &mut String, line: &str) -> anyhow::Result<bool> {
    if line.is_empty() {
        return Ok(true);
    }
    let Some(command) = line.strip_prefix('/') else {
        client
            .message_room(current.clone(), line.to_string())
            .await?;
        return Ok(true);
    };

    let (command, rest) = command.split_once(' ').unwrap_or((command, ""));
    let rest = rest.trim();
    match command {
        "rooms" => client.list_rooms(rest.to_string()).await?,
        "users" => client.list_users(rest.to_string()).await?,
        "create" => client.create_room(rest.to_string()).await?,
        "join" => {
            client.join_room(rest.to_string()).await?;
            *current = rest.to_string();
        }
        "leave" => {
            client.leave_room(rest.to_string()).await?;
            if *current == rest {
                *current = GENERAL_ROOM.to_string();
            }
        }
        "msg" => {
            let Some((user, text)) = rest.split_once(' ') else {
                println!("usage: /msg <user> <text>");
                return Ok(true);
            };
            client
                .message_user(user.to_string(), text.trim().to_string())
                .await?;
        }
        "quit" => {
            client.disconnect().await?;
            return Ok(false);
        }
        other => println!("unknown command: /{}", other),
    }
    Ok(true)
}

fn render(response: &Response) {
    match response {
        Response::Error { code, info } if info.is_empty() => {
            println!("[server error] {}", code);
        }
        Response::Error { code, info } => println!("[server error] {}: {}", code, info),
        Response::FatalError { code, info } if info.is_empty() => {
            println!("[fatal error] {}", code);
        }
        Response::FatalError { code, info } => println!("[fatal error] {}: {}", code, info),
        Response::RoomList { user, rooms } => {
            if user.is_empty() {
                println!("   room listing in server:");
            } else {
                println!("   room listing for user {}:", user);
            }
            for room in rooms {
                println!("      {}", room);
            }
        }
        Response::UserList { room, users } => {
            if room.is_empty() {
                println!("   user listing in server:");
            } else {
                println!("   user listing in room {}:", room);
            }
            for user in users {
                println!("      {}", user);
            }
        }
        Response::RoomMessage { room, sender, text } => {
            println!("<{}@{}> {}", sender, room, text);
        }
        Response::UserMessage { sender, text } => println!("({}) {}", sender, text),
    }
}
