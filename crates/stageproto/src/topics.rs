//! Control-surface addresses. Get and set sides mirror each other:
//! `/live/<domain>/get/<field>` answers what `/live/<domain>/set/<field>` changes.

pub mod song {
    pub const TEMPO: &str = "/live/song/get/tempo";
    pub const NUM_TRACKS: &str = "/live/song/get/num_tracks";
    pub const NUM_SCENES: &str = "/live/song/get/num_scenes";
    pub const SIGNATURE_NUMERATOR: &str = "/live/song/get/signature_numerator";
    pub const SIGNATURE_DENOMINATOR: &str = "/live/song/get/signature_denominator";

    pub const START_PLAYING: &str = "/live/song/start_playing";
    pub const STOP_PLAYING: &str = "/live/song/stop_playing";
    pub const SET_TEMPO: &str = "/live/song/set/tempo";
    pub const FIRE_SCENE: &str = "/live/song/fire_scene";
}

pub mod track {
    pub const NAME: &str = "/live/track/get/name";
    pub const VOLUME: &str = "/live/track/get/volume";
    pub const PANNING: &str = "/live/track/get/panning";
    pub const MUTE: &str = "/live/track/get/mute";
    pub const SOLO: &str = "/live/track/get/solo";
    pub const ARM: &str = "/live/track/get/arm";
    pub const CLIP_NAMES: &str = "/live/track/get/clips/name";
    pub const DEVICE_NAMES: &str = "/live/track/get/devices/name";

    pub const SET_MUTE: &str = "/live/track/set/mute";
    pub const SET_SOLO: &str = "/live/track/set/solo";
    pub const SET_ARM: &str = "/live/track/set/arm";
    pub const SET_VOLUME: &str = "/live/track/set/volume";
    pub const SET_PANNING: &str = "/live/track/set/panning";
}

pub mod clip {
    pub const FIRE: &str = "/live/clip/fire";
    pub const STOP: &str = "/live/clip/stop";
}

pub mod device {
    pub const PARAMETER_NAMES: &str = "/live/device/get/parameters/name";
    pub const PARAMETER_VALUES: &str = "/live/device/get/parameters/value";

    pub const SET_PARAMETER_VALUE: &str = "/live/device/set/parameter/value";
}
