use crate::cli::config::DashboardConfig;
use crate::cli::types::{ConnectionRecord, Snapshot};

const KIBIBYTE: f64 = 1024.0;
const MEBIBYTE: f64 = 1024.0 * KIBIBYTE;
const GIBIBYTE: f64 = 1024.0 * MEBIBYTE;
const TEBIBYTE: f64 = 1024.0 * GIBIBYTE;

/// Human readable size: raw count below 1024, otherwise one decimal with a
/// binary K/M/G/T suffix.
pub fn psize(n: u64) -> String {
    let size = n as f64;
    if size < KIBIBYTE {
        format!("{n}")
    } else if size < MEBIBYTE {
        format!("{:.1}K", size / KIBIBYTE)
    } else if size < GIBIBYTE {
        format!("{:.1}M", size / MEBIBYTE)
    } else if size < TEBIBYTE {
        format!("{:.1}G", size / GIBIBYTE)
    } else {
        format!("{:.1}T", size / TEBIBYTE)
    }
}

fn prate(per_sec: f64) -> String {
    psize(per_sec.max(0.0) as u64)
}

/// Render a snapshot as the dashboard text: server block, connection
/// header and one row per connection in `config.sort_key` order.
pub fn format(snapshot: &Snapshot, config: &DashboardConfig) -> String {
    let varz = &snapshot.varz;
    let rates = &snapshot.rates;
    let mut text = format!(
        "gnatsd version {} (uptime: {})\n\
         Server:\n  \
         Load: CPU:  {:.1}%  Memory: {}  Slow Consumers: {}\n  \
         In:   Msgs: {}  Bytes: {}  Msgs/Sec: {:.1}  Bytes/Sec: {}\n  \
         Out:  Msgs: {}  Bytes: {}  Msgs/Sec: {:.1}  Bytes/Sec: {}\n\
         \nConnections: {}\n",
        varz.version,
        varz.uptime,
        varz.cpu,
        psize(varz.mem),
        varz.slow_consumers,
        psize(varz.in_msgs),
        psize(varz.in_bytes),
        rates.in_msgs,
        prate(rates.in_bytes),
        psize(varz.out_msgs),
        psize(varz.out_bytes),
        rates.out_msgs,
        prate(rates.out_bytes),
        snapshot.connz.num_conns
    );

    text.push_str(&header_row(config.display_subs));
    for conn in config.sort_key.sort(&snapshot.connz.connections) {
        text.push_str(&connection_row(conn, config.display_subs));
    }
    text
}

fn header_row(display_subs: bool) -> String {
    let mut line = format!(
        "  {:<20} {:<8} {:<15} {:<6}  {:<10}  {:<10}  {:<10}  {:<10}  {:<10}  {:<7}  {:<7}  {:<7}  {:<40}",
        "HOST",
        "CID",
        "NAME",
        "SUBS",
        "PENDING",
        "MSGS_TO",
        "MSGS_FROM",
        "BYTES_TO",
        "BYTES_FROM",
        "LANG",
        "VERSION",
        "UPTIME",
        "LAST ACTIVITY"
    );
    if display_subs {
        // Exactly the 13-column width of the subscriptions header.
        line.push_str("SUBSCRIPTIONS");
    }
    line.push('\n');
    line
}

fn connection_row(conn: &ConnectionRecord, display_subs: bool) -> String {
    let mut line = format!(
        "  {:<20} {:<8} {:<15} {:<6}  {:<10}  {:<10}  {:<10}  {:<10}  {:<10}  {:<7}  {:<7}  {:<7}  {:<40}",
        conn.remote(),
        conn.cid,
        conn.name,
        conn.num_subs,
        psize(conn.pending_bytes),
        psize(conn.out_msgs),
        psize(conn.in_msgs),
        psize(conn.out_bytes),
        psize(conn.in_bytes),
        conn.lang,
        conn.version,
        conn.uptime,
        conn.last_activity
    );
    if display_subs {
        line.push_str(&conn.subs.join(", "));
    }
    line.push('\n');
    line
}

pub const HELP_TEXT: &str = "
Command          Description

o<option>        Set the primary sort key to <option>, then press Enter.

                 Option is one of: cid, subs, pending, msgs_to, msgs_from,
                 bytes_to, bytes_from

                 The initial key can be given on the command line with --sort.

n<limit>         Set how many connections are requested from the server,
                 then press Enter.

                 The initial value can be given on the command line with -n.
                 The server applies the limit after sorting, so -n 1 --sort subs
                 shows the connection with the most subscriptions.

s                Toggle the subscriptions column.

Esc              Cancel a pending o/n prompt.

h, ?             Show this help.

q, Ctrl-C        Quit.

Press any key to continue...
";
