//! Quectel-specific initialization.

use crate::at::command::CmdKind;
use crate::at::queue::Cmd;
use crate::config::SharedConfig;

/// Post-detection burst: ICCID, call-state notifications (`^DSCI` or
/// `+QIND: "ccinfo"`, never both), signal/technology indications, LTE
/// registration URCs, then the closing `AT`.
pub fn init_burst(cfg: &SharedConfig) -> Vec<Cmd> {
    let mut cmds = vec![Cmd::new(CmdKind::Qccid, &b"AT+QCCID\r"[..]).ignore()];

    if cfg.dsci {
        cmds.push(Cmd::new(CmdKind::QindcfgCcOff, &b"AT+QINDCFG=\"ccinfo\",0,0\r"[..]).ignore());
        cmds.push(Cmd::new(CmdKind::Dsci, &b"AT^DSCI=1\r"[..]));
    } else {
        cmds.push(Cmd::new(CmdKind::DsciOff, &b"AT^DSCI=0\r"[..]).ignore());
        cmds.push(Cmd::new(CmdKind::QindcfgCc, &b"AT+QINDCFG=\"ccinfo\",1,0\r"[..]));
    }

    cmds.push(Cmd::new(CmdKind::QindcfgCsq, &b"AT+QINDCFG=\"csq\",1,0\r"[..]));
    cmds.push(Cmd::new(CmdKind::QindcfgAct, &b"AT+QINDCFG=\"act\",1,0\r"[..]));
    cmds.push(Cmd::new(CmdKind::QindcfgRing, &b"AT+QINDCFG=\"ring\",0,0\r"[..]));

    if cfg.dtmf {
        cmds.push(Cmd::new(CmdKind::Qtonedet, &b"AT+QTONEDET=1\r"[..]).ignore());
    } else {
        cmds.push(Cmd::new(CmdKind::Qtonedet, &b"AT+QTONEDET=0\r"[..]).ignore());
    }

    cmds.push(Cmd::new(CmdKind::CeregInit, &b"AT+CEREG=2\r"[..]));
    cmds.push(Cmd::new(CmdKind::AtFinal, &b"AT\r"[..]));
    cmds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_selection_is_exclusive() {
        let mut cfg = SharedConfig::default();
        let texts = |cmds: &[Cmd]| -> Vec<String> {
            cmds.iter()
                .map(|c| String::from_utf8_lossy(c.payload.as_deref().unwrap()).into_owned())
                .collect()
        };

        let t = texts(&init_burst(&cfg));
        assert!(t.contains(&"AT+QINDCFG=\"ccinfo\",1,0\r".to_string()));
        assert!(t.contains(&"AT^DSCI=0\r".to_string()));

        cfg.dsci = true;
        let t = texts(&init_burst(&cfg));
        assert!(t.contains(&"AT^DSCI=1\r".to_string()));
        assert!(t.contains(&"AT+QINDCFG=\"ccinfo\",0,0\r".to_string()));
    }

    #[test]
    fn burst_ends_with_final_at() {
        let cmds = init_burst(&SharedConfig::default());
        assert_eq!(cmds.last().unwrap().kind, CmdKind::AtFinal);
    }
}
