use std::io;

#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::{Session, TranscriptProfile};

const QUERY_TAIL: &str =
    "clock=0 sample_ticks=0 sample_count=0 rest_ticks=0 min_value=0 max_value=0 range_check_count=0";

fn main() -> io::Result<()> {
    record_profile(TranscriptProfile::SingleChannel)?;
    record_profile(TranscriptProfile::ContendedBus)?;
    record_profile(TranscriptProfile::StalledAdc)?;
    Ok(())
}

fn record_profile(profile: TranscriptProfile) -> io::Result<()> {
    let mut session = Session::new(profile)?;
    match profile {
        TranscriptProfile::SingleChannel => record_single(&mut session),
        TranscriptProfile::ContendedBus => record_contended(&mut session),
        TranscriptProfile::StalledAdc => record_stalled(&mut session),
        TranscriptProfile::Interactive => Ok(()),
    }
}

fn record_single(session: &mut Session) -> io::Result<()> {
    session.handle_command("help")?;
    session.handle_command(
        "config_hx711 oid=0 dout_pin=4 sck_pin=5 gain=3 sample_interval=10 comm_delay=1 sps=10",
    )?;
    session.handle_command("load 4 8388607 -8388608 4660 -1")?;
    session.handle_command(&format!("query_hx711 oid=0 {QUERY_TAIL}"))?;
    session.handle_command("advance 500000")?;
    session.handle_command("status")?;
    Ok(())
}

fn record_contended(session: &mut Session) -> io::Result<()> {
    session.handle_command(
        "config_hx711 oid=0 dout_pin=4 sck_pin=5 gain=1 sample_interval=10 comm_delay=2 sps=80",
    )?;
    session.handle_command(
        "config_hx711 oid=1 dout_pin=6 sck_pin=7 gain=2 sample_interval=10 comm_delay=2 sps=80",
    )?;
    session.handle_command("load 4 100 101 102")?;
    session.handle_command("load 6 -200 -201 -202")?;
    session.handle_command(&format!("query_hx711 oid=0 {QUERY_TAIL}"))?;
    session.handle_command(&format!("query_hx711 oid=1 {QUERY_TAIL}"))?;
    session.handle_command("advance 12550")?;
    session.handle_command("status")?;
    session.handle_command("advance 300000")?;
    session.handle_command("status")?;
    Ok(())
}

fn record_stalled(session: &mut Session) -> io::Result<()> {
    session.handle_command(
        "config_hx711 oid=0 dout_pin=4 sck_pin=5 gain=1 sample_interval=10 comm_delay=1 sps=80",
    )?;
    session.handle_command(
        "config_hx711 oid=1 dout_pin=6 sck_pin=7 gain=1 sample_interval=10 comm_delay=1 sps=80",
    )?;
    session.handle_command("stall 6")?;
    session.handle_command("load 4 1000 1001")?;
    session.handle_command(&format!("query_hx711 oid=0 {QUERY_TAIL}"))?;
    session.handle_command(&format!("query_hx711 oid=1 {QUERY_TAIL}"))?;
    session.handle_command("advance 250000")?;
    session.handle_command("status")?;
    session.handle_command("stall 6 off")?;
    session.handle_command("advance 250000")?;
    session.handle_command("status")?;
    Ok(())
}
