//! State-changing sends. None of these expect a reply.

use crate::osc::OscArg;
use crate::topics::{clip, device, song, track};

/// One fire-and-forget command to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveCommand {
    Play,
    Stop,
    SetTempo(f32),
    FireClip { track: i32, clip: i32 },
    StopClip { track: i32, clip: i32 },
    FireScene(i32),
    SetMute { track: i32, on: bool },
    SetSolo { track: i32, on: bool },
    SetArm { track: i32, on: bool },
    /// Volume is the control surface's 0.0..=1.0 fader position.
    SetVolume { track: i32, level: f32 },
    /// -1.0 (left) ..= 1.0 (right)
    SetPan { track: i32, value: f32 },
    SetDeviceParam {
        track: i32,
        device: i32,
        param: i32,
        value: f32,
    },
    /// Any address with arbitrary arguments.
    Raw { address: String, args: Vec<OscArg> },
}

impl LiveCommand {
    pub fn topic(&self) -> &str {
        match self {
            LiveCommand::Play => song::START_PLAYING,
            LiveCommand::Stop => song::STOP_PLAYING,
            LiveCommand::SetTempo(_) => song::SET_TEMPO,
            LiveCommand::FireClip { .. } => clip::FIRE,
            LiveCommand::StopClip { .. } => clip::STOP,
            LiveCommand::FireScene(_) => song::FIRE_SCENE,
            LiveCommand::SetMute { .. } => track::SET_MUTE,
            LiveCommand::SetSolo { .. } => track::SET_SOLO,
            LiveCommand::SetArm { .. } => track::SET_ARM,
            LiveCommand::SetVolume { .. } => track::SET_VOLUME,
            LiveCommand::SetPan { .. } => track::SET_PANNING,
            LiveCommand::SetDeviceParam { .. } => device::SET_PARAMETER_VALUE,
            LiveCommand::Raw { address, .. } => address,
        }
    }

    /// Wire arguments. Booleans go out as `1`/`0`.
    pub fn args(&self) -> Vec<OscArg> {
        use OscArg::{Float, Int};

        match self {
            LiveCommand::Play | LiveCommand::Stop => vec![],
            LiveCommand::SetTempo(bpm) => vec![Float(*bpm)],
            LiveCommand::FireClip { track, clip } | LiveCommand::StopClip { track, clip } => {
                vec![Int(*track), Int(*clip)]
            }
            LiveCommand::FireScene(scene) => vec![Int(*scene)],
            LiveCommand::SetMute { track, on }
            | LiveCommand::SetSolo { track, on }
            | LiveCommand::SetArm { track, on } => vec![Int(*track), Int(i32::from(*on))],
            LiveCommand::SetVolume { track, level } => vec![Int(*track), Float(*level)],
            LiveCommand::SetPan { track, value } => vec![Int(*track), Float(*value)],
            LiveCommand::SetDeviceParam {
                track,
                device,
                param,
                value,
            } => vec![Int(*track), Int(*device), Int(*param), Float(*value)],
            LiveCommand::Raw { args, .. } => args.clone(),
        }
    }
}

/// Interpret command-line text as an OSC argument: integer if it parses as
/// one, float if it has a `.` and parses, otherwise a string.
pub fn parse_cli_arg(text: &str) -> OscArg {
    if let Ok(v) = text.parse::<i32>() {
        return OscArg::Int(v);
    }
    if text.contains('.') {
        if let Ok(v) = text.parse::<f32>() {
            return OscArg::Float(v);
        }
    }
    OscArg::Str(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mixer_commands_send_bools_as_ints() {
        let cmd = LiveCommand::SetSolo { track: 2, on: true };
        assert_eq!(cmd.topic(), "/live/track/set/solo");
        assert_eq!(cmd.args(), vec![OscArg::Int(2), OscArg::Int(1)]);

        let cmd = LiveCommand::SetMute { track: 0, on: false };
        assert_eq!(cmd.args(), vec![OscArg::Int(0), OscArg::Int(0)]);
    }

    #[test]
    fn device_param_argument_order() {
        let cmd = LiveCommand::SetDeviceParam {
            track: 1,
            device: 0,
            param: 4,
            value: 0.25,
        };
        assert_eq!(cmd.topic(), "/live/device/set/parameter/value");
        assert_eq!(
            cmd.args(),
            vec![OscArg::Int(1), OscArg::Int(0), OscArg::Int(4), OscArg::Float(0.25)]
        );
    }

    #[test]
    fn set_and_get_topics_mirror() {
        let set = LiveCommand::SetPan { track: 0, value: 0.0 };
        assert_eq!(
            set.topic().replace("/set/", "/get/"),
            crate::topics::track::PANNING
        );
        assert_eq!(
            LiveCommand::SetTempo(120.0).topic().replace("/set/", "/get/"),
            crate::topics::song::TEMPO
        );
    }

    #[test]
    fn raw_passes_through() {
        let cmd = LiveCommand::Raw {
            address: "/live/song/continue_playing".into(),
            args: vec![],
        };
        assert_eq!(cmd.topic(), "/live/song/continue_playing");
        assert!(cmd.args().is_empty());
    }

    #[test]
    fn cli_args() {
        assert_eq!(parse_cli_arg("3"), OscArg::Int(3));
        assert_eq!(parse_cli_arg("-1"), OscArg::Int(-1));
        assert_eq!(parse_cli_arg("0.5"), OscArg::Float(0.5));
        assert_eq!(parse_cli_arg("1e3"), OscArg::Str("1e3".into()));
        assert_eq!(parse_cli_arg("Bass"), OscArg::Str("Bass".into()));
        assert_eq!(parse_cli_arg("1.2.3"), OscArg::Str("1.2.3".into()));
    }
}
