use crate::traits::AccessPoint;

/// Parse `wpa_cli scan_results`-style output into a list of access points.
///
/// 每行格式：`bssid \t frequency \t signal level \t flags \t ssid`。
/// 隐藏网络（空 SSID）被跳过，同名网络只保留信号最强的一个，
/// 结果按信号强度从强到弱排列。
pub fn parse_scan_results(output: &str) -> Vec<AccessPoint> {
    let mut networks: Vec<AccessPoint> = Vec::new();
    for line in output.lines().skip(1) {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 5 {
            continue;
        }
        let rssi: i32 = parts[2].trim().parse().unwrap_or(-100);
        let flags = parts[3];
        let ssid = unescape_ssid(parts[4]);

        if ssid.is_empty() || ssid.chars().all(|c| c == '\0') {
            continue;
        }

        let encrypted = flags.contains("WPA") || flags.contains("WEP") || flags.contains("SAE");

        match networks.iter_mut().find(|ap| ap.ssid == ssid) {
            Some(existing) if existing.rssi < rssi => {
                existing.rssi = rssi;
                existing.encrypted = encrypted;
            }
            Some(_) => {}
            None => networks.push(AccessPoint { ssid, rssi, encrypted }),
        }
    }
    networks.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    networks
}

/// 还原 wpa_cli 对 SSID 的转义（`\xHH`、`\\`、`\"` 等）
pub fn unescape_ssid(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 >= bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        match bytes[i + 1] {
            b'x' => {
                let hex = raw.get(i + 2..i + 4).and_then(|h| u8::from_str_radix(h, 16).ok());
                match hex {
                    Some(b) => {
                        out.push(b);
                        i += 4;
                    }
                    None => {
                        out.push(b'\\');
                        i += 1;
                    }
                }
                continue;
            }
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'e' => out.push(0x1b),
            other => out.push(other),
        }
        i += 2;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "bssid / frequency / signal level / flags / ssid\n\
        aa:bb:cc:dd:ee:01\t2412\t-71\t[WPA2-PSK-CCMP][ESS]\tHome\n\
        aa:bb:cc:dd:ee:02\t2437\t-48\t[ESS]\tCafe Guest\n\
        aa:bb:cc:dd:ee:03\t5180\t-60\t[WPA2-PSK-CCMP][ESS]\tHome\n\
        aa:bb:cc:dd:ee:04\t2462\t-80\t[WPA2-PSK-CCMP][ESS]\t\n\
        aa:bb:cc:dd:ee:05\t2462\t-90\t[WEP][ESS]\t\\xe5\\xae\\xb6\n";

    #[test]
    fn parses_sorts_and_dedups() {
        let networks = parse_scan_results(SAMPLE);
        assert_eq!(
            networks,
            vec![
                AccessPoint { ssid: "Cafe Guest".into(), rssi: -48, encrypted: false },
                AccessPoint { ssid: "Home".into(), rssi: -60, encrypted: true },
                AccessPoint { ssid: "家".into(), rssi: -90, encrypted: true },
            ]
        );
    }

    #[test]
    fn unescapes_wpa_cli_sequences() {
        assert_eq!(unescape_ssid(r#"My \"Net\""#), "My \"Net\"");
        assert_eq!(unescape_ssid(r"back\\slash"), "back\\slash");
        assert_eq!(unescape_ssid(r"\x41\x42C"), "ABC");
        assert_eq!(unescape_ssid(r"trailing\"), "trailing\\");
        assert_eq!(unescape_ssid(r"\xZZ"), "\\xZZ");
    }
}
