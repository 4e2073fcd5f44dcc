use std::{process::ExitCode, time::Duration};

use shadowrad::{
    link::Link,
    logging,
    ndp::{
        Conn, Direction, Message, NdpConn, NdpOption, RouterSolicitation, ALL_ROUTERS,
    },
};
use tracing::Level;

fn main() -> ExitCode {
    let mut pargs = pico_args::Arguments::from_env();
    let wait: u64 = pargs
        .opt_value_from_str("--timeout")
        .expect("parsing --timeout")
        .unwrap_or(5);
    let iface: String = match pargs.free_from_str() {
        Ok(iface) => iface,
        Err(_) => {
            eprintln!("usage: solicit [--timeout <SECS>] <INTERFACE>");
            return ExitCode::from(2);
        }
    };

    logging::init_stdout(Level::WARN);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("building runtime");

    runtime.block_on(async {
        let link = Link::lookup(&iface).expect("interface lookup");
        let conn = Conn::dial(&link, false).expect("opening NDP socket (needs CAP_NET_RAW)");

        let rs = Message::RouterSolicitation(RouterSolicitation {
            options: vec![NdpOption::LinkLayerAddress {
                direction: Direction::Source,
                addr: link.addr,
            }],
        });
        conn.send_to(&rs, ALL_ROUTERS).await.expect("sending solicitation");
        println!("sent router solicitation on {iface}");

        let reply = tokio::time::timeout(Duration::from_secs(wait), async {
            loop {
                match conn.recv_from().await {
                    Ok((Message::RouterAdvertisement(ra), from)) => return Ok((ra, from)),
                    Ok(_) => continue,
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match reply {
            Ok(Ok((ra, from))) => {
                println!("router advertisement from {from}:");
                println!("{ra:#?}");
                ExitCode::SUCCESS
            }
            Ok(Err(e)) => {
                eprintln!("receive failed: {e}");
                ExitCode::FAILURE
            }
            Err(_) => {
                eprintln!("no router advertisement within {wait}s");
                ExitCode::FAILURE
            }
        }
    })
}
