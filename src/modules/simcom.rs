//! SIMCom-specific initialization.

use crate::at::command::CmdKind;
use crate::at::queue::Cmd;
use crate::config::SharedConfig;

/// Post-detection burst: ICCID variants, periodic `+CLCC` auto reporting,
/// registration and signal URCs, network-time URCs, then the closing `AT`.
pub fn init_burst(cfg: &SharedConfig) -> Vec<Cmd> {
    let mut cmds = vec![
        Cmd::new(CmdKind::Ccid, &b"AT+CCID\r"[..]).ignore(),
        Cmd::new(CmdKind::Ciccid, &b"AT+CICCID\r"[..]).ignore(),
        Cmd::new(CmdKind::Clcc, &b"AT+CLCC=1\r"[..]),
        Cmd::new(CmdKind::CregInit, &b"AT+CREG=2\r"[..]),
        Cmd::new(CmdKind::CnsmodInit, &b"AT+CNSMOD=1\r"[..]).ignore(),
        Cmd::new(CmdKind::AutocsqInit, &b"AT+AUTOCSQ=1,1\r"[..]).ignore(),
        Cmd::new(CmdKind::ExunsolInit, &b"AT+EXUNSOL=\"SQ\",1\r"[..]).ignore(),
        Cmd::new(CmdKind::CltsInit, &b"AT+CLTS=1\r"[..]).ignore(),
    ];

    if cfg.dtmf {
        cmds.push(Cmd::new(CmdKind::Ddet, &b"AT+DDET=1\r"[..]).ignore());
    } else {
        cmds.push(Cmd::new(CmdKind::Ddet, &b"AT+DDET=0\r"[..]).ignore());
    }

    cmds.push(Cmd::new(CmdKind::AtFinal, &b"AT\r"[..]));
    cmds
}
