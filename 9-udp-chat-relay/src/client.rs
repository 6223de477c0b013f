use std::{
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, ensure};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    select,
};
use tracing::{debug, warn};

use crate::{
    cli::ClientArgs,
    message::{
        Body, ClientToServer, EncodeError, Image, MAX_IMAGE_PAYLOAD, ServerToClient, WireMessage,
    },
    transport::{RECEIVE_BUFFER_LEN, SendError, Transport},
};

/// One line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Blank,
    Quit,
    Say(String),
    Whisper { target: String, text: String },
    Image { target: Option<String>, path: PathBuf },
    Usage(&'static str),
}

const MSG_USAGE: &str = "usage: /msg <name> <text>";
const IMAGE_USAGE: &str = "usage: /image [@name] <path>";

pub fn parse_input(line: &str) -> Input {
    let line = line.trim_end();
    if line.trim().is_empty() {
        return Input::Blank;
    }
    if line.eq_ignore_ascii_case("/quit") {
        return Input::Quit;
    }

    if let Some(rest) = line.strip_prefix("/msg ") {
        return match rest.trim_start().split_once(' ') {
            Some((target, text)) if !text.trim().is_empty() => Input::Whisper {
                target: target.to_string(),
                text: text.to_string(),
            },
            _ => Input::Usage(MSG_USAGE),
        };
    }

    if let Some(rest) = line.strip_prefix("/image ") {
        let rest = rest.trim();
        let (target, path) = match rest.strip_prefix('@') {
            Some(addressed) => match addressed.split_once(' ') {
                Some((target, path)) => (Some(target.to_string()), path.trim()),
                None => return Input::Usage(IMAGE_USAGE),
            },
            None => (None, rest),
        };
        if path.is_empty() {
            return Input::Usage(IMAGE_USAGE);
        }
        return Input::Image {
            target,
            path: PathBuf::from(path),
        };
    }

    Input::Say(line.to_string())
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let transport = establish_socket(&args).await?;
    send_connect(&transport, &args).await?;
    write_stdout(&format!("*** joined {} as {}", args.server, args.name.trim())).await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    run_client_loop(&transport, args.server, &mut stdin, &mut input).await
}

async fn establish_socket(args: &ClientArgs) -> Result<Transport> {
    let bind = args.bind_addr();
    let transport = Transport::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    debug!(local = ?transport.local_addr().ok(), server = %args.server, "client socket ready");
    Ok(transport)
}

async fn send_connect(transport: &Transport, args: &ClientArgs) -> Result<()> {
    let connect = ClientToServer::Connect {
        name: args.name.trim().to_string(),
    };
    transport
        .send_message(args.server, &connect)
        .await
        .with_context(|| format!("failed to reach {}", args.server))?;
    Ok(())
}

async fn run_client_loop(
    transport: &Transport,
    server: SocketAddr,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
) -> Result<()> {
    let mut buffer = vec![0u8; RECEIVE_BUFFER_LEN];

    loop {
        select! {
            received = transport.recv_from(&mut buffer) => {
                let (len, from) = received.context("failed to receive datagram")?;
                handle_datagram(&buffer[..len], from, server).await?;
            }
            bytes_read = stdin.read_line(input) => {
                let keep_going = handle_stdin_input(bytes_read, input, transport, server).await?;
                input.clear();
                if !keep_going {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_datagram(datagram: &[u8], from: SocketAddr, server: SocketAddr) -> Result<()> {
    if from != server {
        debug!(peer = %from, "ignoring datagram from unknown peer");
        return Ok(());
    }

    match ServerToClient::decode(datagram) {
        Ok(message) => render_server_message(message).await?,
        Err(err) => debug!(error = %err, "dropping malformed datagram from server"),
    }
    Ok(())
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    transport: &Transport,
    server: SocketAddr,
) -> Result<bool> {
    if bytes_read? == 0 {
        return Ok(false);
    }

    let message = match parse_input(input) {
        Input::Blank => return Ok(true),
        Input::Quit => {
            write_stdout("*** leaving chat").await?;
            return Ok(false);
        }
        Input::Usage(usage) => {
            write_stderr(usage).await?;
            return Ok(true);
        }
        Input::Say(text) => ClientToServer::Broadcast {
            body: Body::Text(text),
        },
        Input::Whisper { target, text } => ClientToServer::Private {
            target,
            body: Body::Text(text),
        },
        Input::Image { target, path } => {
            let image = match read_image(&path).await {
                Ok(image) => image,
                Err(err) => {
                    write_stderr(&format!("!!! {err:#}")).await?;
                    return Ok(true);
                }
            };
            let body = Body::Image(image);
            match target {
                Some(target) => ClientToServer::Private { target, body },
                None => ClientToServer::Broadcast { body },
            }
        }
    };

    send_to_server(transport, server, &message).await?;
    Ok(true)
}

async fn read_image(path: &Path) -> Result<Image> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))?;
    let image = Image { filename, data };
    ensure!(
        image.encoded_len() <= MAX_IMAGE_PAYLOAD,
        "image too large: {} is {} bytes once encoded, limit {MAX_IMAGE_PAYLOAD}",
        path.display(),
        image.encoded_len()
    );
    Ok(image)
}

async fn send_to_server(
    transport: &Transport,
    server: SocketAddr,
    message: &ClientToServer,
) -> io::Result<()> {
    match transport.send_message(server, message).await {
        Ok(_) => Ok(()),
        Err(SendError::Encode(EncodeError::PayloadTooLarge { size, limit })) => {
            write_stderr(&format!("!!! message too large ({size} bytes, limit {limit})")).await
        }
        Err(SendError::Encode(err)) => write_stderr(&format!("!!! {err}")).await,
        Err(SendError::Io(err)) => {
            warn!(error = ?err, "failed to send message");
            Ok(())
        }
    }
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn render_server_message(message: ServerToClient) -> io::Result<()> {
    match message {
        ServerToClient::Presence { names } => {
            write_stdout(&format!("*** online: {}", names.join(", "))).await
        }
        ServerToClient::Relay {
            body: Body::Text(text),
        } => write_stdout(&text).await,
        ServerToClient::Relay {
            body: Body::Image(image),
        } => write_stdout(&format!("*** {image}")).await,
        ServerToClient::Private { body, .. } => write_stdout(&format!("[private] {body}")).await,
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
