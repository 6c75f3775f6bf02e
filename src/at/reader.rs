//! Reply framing.
//!
//! The modem interleaves command results, URCs and PDU payloads on one byte
//! stream, chunked arbitrarily by the TTY. [`Framer::extract`] demarcates
//! one reply per call against the device ring buffer, tolerating damaged
//! preambles and prefixes glued to a previous line.

use crate::rb::{PrefixCmp, RingBuffer};

const EOL: &[u8] = b"\r\n";
const T_OK: &[u8] = b"\r\n\r\nOK\r\n";
const T_CMGL: &[u8] = b"\r\n+CMGL:";

/// One demarcated reply: `len` bytes to hand to the classifier plus `skip`
/// structural bytes to discard after them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub len: usize,
    pub skip: usize,
}

/// Framer state. `in_reply` is false between replies, while the `\r\n`
/// preamble is expected, and true inside a reply payload.
#[derive(Debug, Default)]
pub struct Framer {
    in_reply: bool,
}

impl Framer {
    pub fn new() -> Self {
        Framer::default()
    }

    pub fn reset(&mut self) {
        self.in_reply = false;
    }

    /// Extract the next reply, consuming any leading garbage. Returns
    /// `None` when the buffered bytes do not yet hold a complete reply.
    pub fn extract<const N: usize>(&mut self, rb: &mut RingBuffer<N>) -> Option<Frame> {
        loop {
            if rb.is_empty() {
                return None;
            }

            if !self.in_reply {
                match rb.cmp_prefix(EOL) {
                    PrefixCmp::Matched => {
                        rb.read_advance(EOL.len());
                        self.in_reply = true;
                        continue;
                    }
                    PrefixCmp::Insufficient => return None,
                    PrefixCmp::Mismatch => {
                        // A reply without its preamble. Printable bytes are
                        // taken as a benign start of payload, anything else
                        // is dropped up to the next carriage return.
                        if rb.read_is_printable() {
                            self.in_reply = true;
                            continue;
                        }
                        if rb.starts_with(b"\n") {
                            rb.read_advance(1);
                            continue;
                        }
                        match rb.read_until(b"\r") {
                            Some(v) => {
                                let n = v.len() + 1;
                                rb.read_advance(n);
                            }
                            None => {
                                let n = rb.used();
                                rb.read_advance(n);
                            }
                        }
                        continue;
                    }
                }
            }

            // Inside a reply payload.
            if rb.starts_with(b"+CSSI:") {
                self.in_reply = false;
                return Some(Frame { len: 6, skip: 0 });
            }

            if rb.starts_with(b"\r\n+CSSU:")
                || rb.starts_with(b"\r\n+CMS ERROR:")
                || rb.starts_with(b"\r\n+CMGS:")
            {
                // Glued to the previous line; strip the separator and retry.
                rb.read_advance(2);
                continue;
            }

            if rb.starts_with(b"> ") {
                self.in_reply = false;
                return Some(Frame { len: 2, skip: 0 });
            }

            if rb.starts_with(b"+CMGR:") || rb.starts_with(b"+CNUM:") || rb.starts_with(b"ERROR+CNUM:")
            {
                // Reply body runs to the final OK; the trailing OK line is
                // left in place and framed separately.
                return match rb.read_until(T_OK) {
                    Some(v) => Some(Frame {
                        len: v.len(),
                        skip: 4,
                    }),
                    None => None,
                };
            }

            if rb.starts_with(b"+CMGL:") {
                if let Some(v) = rb.read_until(T_CMGL) {
                    return Some(Frame {
                        len: v.len(),
                        skip: 2,
                    });
                }
                return match rb.read_until(T_OK) {
                    Some(v) => Some(Frame {
                        len: v.len(),
                        skip: 4,
                    }),
                    None => None,
                };
            }

            if rb.starts_with(b"+CMT:")
                || rb.starts_with(b"+CBM:")
                || rb.starts_with(b"+CDS:")
                || rb.starts_with(b"+CLASS0:")
            {
                // Two logical lines: header and hex PDU.
                return match rb.find_second_eol() {
                    Some(pos) => {
                        self.in_reply = false;
                        Some(Frame { len: pos, skip: 1 })
                    }
                    None => None,
                };
            }

            return match rb.read_until(EOL) {
                Some(v) => {
                    self.in_reply = false;
                    // Keep the '\r' so full-line ids classify exactly.
                    Some(Frame {
                        len: v.len() + 1,
                        skip: 0,
                    })
                }
                None => None,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::at::response::ResponseKind;

    fn drain<const N: usize>(
        framer: &mut Framer,
        rb: &mut RingBuffer<N>,
    ) -> Vec<(ResponseKind, Vec<u8>)> {
        let mut out = Vec::new();
        while let Some(frame) = framer.extract(rb) {
            let mut line = Vec::new();
            rb.read_n(frame.len).unwrap().concat_into(&mut line);
            rb.read_advance(frame.len + frame.skip);
            if line.is_empty() {
                continue;
            }
            out.push((ResponseKind::classify(&line), line));
        }
        out
    }

    #[test]
    fn single_ok() {
        let mut rb: RingBuffer<256> = RingBuffer::new();
        let mut framer = Framer::new();
        rb.write_slice(b"\r\nOK\r\n");
        let replies = drain(&mut framer, &mut rb);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, ResponseKind::Ok);
        // Only the final `\n` of the closing EOL remains pending.
        assert_eq!(rb.used(), 1);
    }

    #[test]
    fn back_to_back_replies_in_order() {
        let mut rb: RingBuffer<256> = RingBuffer::new();
        let mut framer = Framer::new();
        rb.write_slice(b"\r\nOK\r\n\r\n+CSQ: 18,99\r\n\r\nRING\r\n");
        let kinds: Vec<_> = drain(&mut framer, &mut rb)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(
            kinds,
            [ResponseKind::Ok, ResponseKind::Csq, ResponseKind::Ring]
        );
        assert_eq!(rb.used(), 1);
    }

    #[test]
    fn chunked_arrival() {
        let mut rb: RingBuffer<256> = RingBuffer::new();
        let mut framer = Framer::new();

        rb.write_slice(b"\r\nNO CAR");
        assert!(framer.extract(&mut rb).is_none());

        rb.write_slice(b"RIER\r\n");
        let replies = drain(&mut framer, &mut rb);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, ResponseKind::NoCarrier);
    }

    #[test]
    fn garbage_between_replies() {
        let mut rb: RingBuffer<256> = RingBuffer::new();
        let mut framer = Framer::new();
        rb.write_slice(b"\x00\x01\x02\r\nOK\r\n");
        let replies = drain(&mut framer, &mut rb);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, ResponseKind::Ok);
    }

    #[test]
    fn missing_preamble_recovers() {
        let mut rb: RingBuffer<256> = RingBuffer::new();
        let mut framer = Framer::new();
        rb.write_slice(b"+CSQ: 23,0\r\n");
        let replies = drain(&mut framer, &mut rb);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, ResponseKind::Csq);
    }

    #[test]
    fn sms_prompt() {
        let mut rb: RingBuffer<256> = RingBuffer::new();
        let mut framer = Framer::new();
        rb.write_slice(b"\r\n> ");
        let replies = drain(&mut framer, &mut rb);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, ResponseKind::SmsPrompt);
        assert_eq!(replies[0].1, b"> ");
        assert!(rb.is_empty());
    }

    #[test]
    fn cmgr_runs_to_final_ok() {
        let mut rb: RingBuffer<512> = RingBuffer::new();
        let mut framer = Framer::new();
        rb.write_slice(b"\r\n+CMGR: 0,,24\r\n07911234\r\n\r\nOK\r\n");
        let replies = drain(&mut framer, &mut rb);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].0, ResponseKind::Cmgr);
        assert_eq!(&replies[0].1[..], b"+CMGR: 0,,24\r\n07911234");
        // The trailing OK is framed as its own reply.
        assert_eq!(replies[1].0, ResponseKind::Ok);
    }

    #[test]
    fn cmgl_elements_then_ok() {
        let mut rb: RingBuffer<512> = RingBuffer::new();
        let mut framer = Framer::new();
        rb.write_slice(b"\r\n+CMGL: 0,1,,24\r\nAABB\r\n+CMGL: 1,1,,24\r\nCCDD\r\n\r\nOK\r\n");
        let replies = drain(&mut framer, &mut rb);
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0].0, ResponseKind::Cmgl);
        assert_eq!(&replies[0].1[..], b"+CMGL: 0,1,,24\r\nAABB");
        assert_eq!(replies[1].0, ResponseKind::Cmgl);
        assert_eq!(&replies[1].1[..], b"+CMGL: 1,1,,24\r\nCCDD");
        assert_eq!(replies[2].0, ResponseKind::Ok);
    }

    #[test]
    fn cmt_spans_two_lines() {
        let mut rb: RingBuffer<512> = RingBuffer::new();
        let mut framer = Framer::new();
        rb.write_slice(b"\r\n+CMT: ,29\r\n07911234DEADBEEF\r\n");
        let replies = drain(&mut framer, &mut rb);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, ResponseKind::Cmt);
        assert_eq!(&replies[0].1[..], b"+CMT: ,29\r\n07911234DEADBEEF");
        // Only the final `\n` remains.
        assert_eq!(rb.used(), 1);
    }

    #[test]
    fn glued_cmgs_prefix() {
        let mut rb: RingBuffer<256> = RingBuffer::new();
        let mut framer = Framer::new();
        // "+CMGS:" glued to the previous line without its own preamble.
        rb.write_slice(b"\r\n\r\n+CMGS: 7\r\n\r\nOK\r\n");
        let replies = drain(&mut framer, &mut rb);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].0, ResponseKind::Cmgs);
        assert_eq!(replies[1].0, ResponseKind::Ok);
    }

    #[test]
    fn cssi_short_prefix() {
        let mut rb: RingBuffer<256> = RingBuffer::new();
        let mut framer = Framer::new();
        rb.write_slice(b"\r\n+CSSI: 1\r\n");
        let replies = drain(&mut framer, &mut rb);
        assert_eq!(replies[0].0, ResponseKind::Cssi);
        assert_eq!(&replies[0].1[..], b"+CSSI:");
        // The parameter tail is reframed as an unknown line.
        assert_eq!(replies[1].0, ResponseKind::Unknown);
    }
}
