/// How an action's play time maps onto its keyframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaybackMode {
    #[default]
    Loop,
    /// Terminal actions (death, hold-last-frame). Freezes on `N - 2`.
    HoldLast,
    /// Single-play actions. Stops on `N - 1` and reports completion.
    Once,
}

/// Pair of keyframes to interpolate plus the factor between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePosition {
    pub frame0: usize,
    pub frame1: usize,
    pub t: f32,
    pub finished: bool,
}

impl FramePosition {
    pub const REST: Self = Self {
        frame0: 0,
        frame1: 0,
        t: 0.0,
        finished: false,
    };

    fn frozen(frame: usize, finished: bool) -> Self {
        Self {
            frame0: frame,
            frame1: frame,
            t: 0.0,
            finished,
        }
    }
}

/// Maps a continuous play time (in keyframes) onto `[0, key_count - 1]`.
///
/// `restart_early` shortens a looping cycle by one key when the last key
/// duplicates the first one, so the wrap happens without a repeated frame.
pub fn frame_position(
    play_time: f32,
    key_count: usize,
    mode: PlaybackMode,
    restart_early: bool,
) -> FramePosition {
    if key_count <= 1 {
        return FramePosition::frozen(0, mode == PlaybackMode::Once);
    }

    let play_time = if play_time.is_finite() { play_time } else { 0.0 };

    match mode {
        PlaybackMode::Loop => {
            let cycle = if restart_early && key_count > 2 {
                key_count - 1
            } else {
                key_count
            };
            let position = play_time.rem_euclid(cycle as f32);
            let frame0 = (position.floor() as usize).min(cycle - 1);
            let t = (position - frame0 as f32).clamp(0.0, 1.0);
            let frame1 = if frame0 + 1 >= cycle { 0 } else { frame0 + 1 };
            FramePosition {
                frame0,
                frame1,
                t,
                finished: false,
            }
        }
        PlaybackMode::HoldLast => {
            let last = key_count.saturating_sub(2);
            clamped_position(play_time, last, false)
        }
        PlaybackMode::Once => {
            let last = key_count - 1;
            clamped_position(play_time, last, true)
        }
    }
}

fn clamped_position(play_time: f32, last: usize, report_finish: bool) -> FramePosition {
    let position = play_time.max(0.0);
    if position >= last as f32 {
        return FramePosition::frozen(last, report_finish);
    }

    let frame0 = position.floor() as usize;
    FramePosition {
        frame0,
        frame1: (frame0 + 1).min(last),
        t: (position - frame0 as f32).clamp(0.0, 1.0),
        finished: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODES: [PlaybackMode; 3] = [PlaybackMode::Loop, PlaybackMode::HoldLast, PlaybackMode::Once];

    #[test]
    fn frames_stay_in_range_for_any_play_time() {
        let times = [
            -1000.5, -20.0, -3.25, -0.0001, 0.0, 0.4, 1.0, 7.999, 19.0, 19.99, 20.0, 57.3, 1.0e6,
            f32::NAN, f32::INFINITY,
        ];

        for key_count in [1usize, 2, 3, 7, 20] {
            for mode in MODES {
                for restart in [false, true] {
                    for time in times {
                        let position = frame_position(time, key_count, mode, restart);
                        assert!(
                            position.frame0 < key_count && position.frame1 < key_count,
                            "{position:?} out of range for N={key_count} mode={mode:?} time={time}"
                        );
                        assert!(
                            (0.0..=1.0).contains(&position.t),
                            "t out of range: {position:?} time={time}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn negative_time_wraps_backwards_in_loops() {
        let position = frame_position(-0.5, 4, PlaybackMode::Loop, false);
        assert_eq!(position.frame0, 3);
        assert_eq!(position.frame1, 0);
        assert!((position.t - 0.5).abs() < 1e-5);
    }

    #[test]
    fn loop_wraps_last_frame_to_first() {
        let position = frame_position(5.25, 6, PlaybackMode::Loop, false);
        assert_eq!((position.frame0, position.frame1), (5, 0));
    }

    #[test]
    fn early_restart_skips_duplicated_last_key() {
        let plain = frame_position(5.5, 6, PlaybackMode::Loop, false);
        let early = frame_position(5.5, 6, PlaybackMode::Loop, true);
        assert_eq!(plain.frame0, 5);
        assert_eq!(early.frame0, 0);
        assert!((early.t - 0.5).abs() < 1e-5);

        let before_wrap = frame_position(4.5, 6, PlaybackMode::Loop, true);
        assert_eq!((before_wrap.frame0, before_wrap.frame1), (4, 0));
    }

    #[test]
    fn hold_last_freezes_one_frame_before_end() {
        let position = frame_position(19.0, 20, PlaybackMode::HoldLast, false);
        assert_eq!(position, FramePosition::frozen(18, false));

        let playing = frame_position(17.5, 20, PlaybackMode::HoldLast, false);
        assert_eq!((playing.frame0, playing.frame1), (17, 18));
    }

    #[test]
    fn once_stops_on_last_frame_and_reports_completion() {
        let running = frame_position(8.5, 10, PlaybackMode::Once, false);
        assert!(!running.finished);
        assert_eq!((running.frame0, running.frame1), (8, 9));

        let done = frame_position(12.0, 10, PlaybackMode::Once, false);
        assert!(done.finished);
        assert_eq!((done.frame0, done.frame1), (9, 9));
    }
}
