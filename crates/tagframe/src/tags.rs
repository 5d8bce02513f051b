//! # Tags
//!
//! Reserved control tags and the well-known command/answer pairs of the driver.
//!
//! Commands live in the `1xxxx` range. The driver answers a command with the
//! tag `command + 10000`.

/// Peer-initiated close or driver-side error. Also sent by the client as a
/// courtesy signal before it disconnects.
pub const CLOSE: i32 = 0;

/// Keepalive ping, sent by the client once per receive cycle.
pub const KEEPALIVE: i32 = 1;

/// Tags below this value are control traffic, never application frames.
pub const FIRST_APPLICATION_TAG: i32 = 2;

/// Offset between a command tag and the tag of its answer.
pub const ANSWER_OFFSET: i32 = 10_000;

pub const CMD_TIMEOUT_SOCKET: i32 = 10_007;
pub const ANS_TIMEOUT_SOCKET: i32 = 20_007;

pub const CMD_CONFIG: i32 = 10_000;
pub const ANS_CONFIG: i32 = 20_000;
pub const CMD_DATE: i32 = 10_002;
pub const ANS_DATE: i32 = 20_002;
pub const CMD_GAIN_AUTO: i32 = 10_005;
pub const ANS_GAIN_AUTO: i32 = 20_005;
pub const CMD_HALT: i32 = 10_006;
pub const CMD_STOP: i32 = 10_100;
pub const ANS_STOP: i32 = 20_100;
pub const CMD_BLOC: i32 = 10_200;
pub const ANS_BLOC: i32 = 20_200;
pub const CMD_TEST_CONFIG: i32 = 10_202;
pub const ANS_TEST_CONFIG: i32 = 20_202;
pub const CMD_MEAS_TEMP: i32 = 10_208;
pub const ANS_MEAS_TEMP: i32 = 20_208;
pub const CMD_PROFILE_INST: i32 = 10_300;
pub const ANS_PROFILE_INST: i32 = 20_300;
pub const CMD_PROFILE_AAVG: i32 = 10_301;
pub const ANS_PROFILE_AAVG: i32 = 20_301;
pub const CMD_PROFILE_MAVG: i32 = 10_302;
pub const ANS_PROFILE_MAVG: i32 = 20_302;
pub const CMD_START_RECORD: i32 = 10_400;
pub const ANS_START_RECORD: i32 = 20_400;
pub const CMD_STOP_RECORD: i32 = 10_500;
pub const ANS_STOP_RECORD: i32 = 20_500;
pub const CMD_PING: i32 = 10_600;
pub const ANS_PONG: i32 = 20_600;
pub const CMD_DRIVER_VERSION: i32 = 10_700;
pub const ANS_DRIVER_VERSION: i32 = 20_700;
pub const CMD_FRONT_ON: i32 = 10_800;
pub const ANS_FRONT_ON: i32 = 20_800;
pub const CMD_FRONT_OFF: i32 = 10_900;
pub const ANS_FRONT_OFF: i32 = 20_900;
pub const CMD_BATTERY: i32 = 11_000;
pub const ANS_BATTERY: i32 = 21_000;
pub const CMD_READ_ADC: i32 = 12_300;
pub const ANS_READ_ADC: i32 = 22_300;

/// How the receive side should treat a tag read off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagClass {
    /// Tag 0: the driver reports an error or is closing.
    Close,
    /// Negative tags and the keepalive echo: skipped, the reader re-reads a tag.
    Noise,
    /// Anything else carries a length and a payload.
    Frame,
}

pub fn classify(tag: i32) -> TagClass {
    if tag == CLOSE {
        TagClass::Close
    } else if tag < FIRST_APPLICATION_TAG {
        TagClass::Noise
    } else {
        TagClass::Frame
    }
}

/// Returns the answer tag the driver uses for `command`.
pub fn answer_for(command: i32) -> i32 {
    command + ANSWER_OFFSET
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_reserved_tags() {
        assert_eq!(classify(CLOSE), TagClass::Close);
        assert_eq!(classify(KEEPALIVE), TagClass::Noise);
        assert_eq!(classify(-7), TagClass::Noise);
        assert_eq!(classify(2), TagClass::Frame);
        assert_eq!(classify(ANS_DRIVER_VERSION), TagClass::Frame);
    }

    #[test]
    fn test_answer_pairs() {
        assert_eq!(answer_for(CMD_TIMEOUT_SOCKET), ANS_TIMEOUT_SOCKET);
        assert_eq!(answer_for(CMD_DRIVER_VERSION), ANS_DRIVER_VERSION);
        assert_eq!(answer_for(CMD_PING), ANS_PONG);
        assert_eq!(answer_for(CMD_READ_ADC), ANS_READ_ADC);
        assert_eq!(answer_for(CMD_BLOC), ANS_BLOC);
    }
}
