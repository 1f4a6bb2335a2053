//! Terminal view: a one-line face rendered from the current pose.
//!
//! Pure rendering; the view holds no state and owns no timers. A small
//! task redraws the line whenever the pose or the canonical state change.

use std::io::Write;

use tokio::sync::watch;
use tracing::debug;

use crate::pose::{AnimationPose, HandGesture, MouthState, PoseName};
use crate::state::AvatarState;

/// Render the avatar as a single line of text.
pub fn render(pose: &AnimationPose, state: &AvatarState) -> String {
    if !state.active {
        return "( =_= ) zzz".to_string();
    }

    let eye = if pose.blinking {
        '-'
    } else {
        match pose.pose {
            PoseName::Happy => '^',
            PoseName::Sad => 'T',
            PoseName::Surprised => 'O',
            PoseName::Thinking => '?',
            PoseName::Idle | PoseName::Speaking => 'o',
        }
    };

    let mouth = match (pose.pose, pose.mouth) {
        (PoseName::Speaking, MouthState::Open) => 'O',
        (PoseName::Speaking, MouthState::Closed) => '_',
        (PoseName::Happy, _) => 'u',
        (PoseName::Sad, _) => 'n',
        (PoseName::Surprised, _) => 'o',
        _ => '_',
    };

    let mut line = format!("( {eye} {mouth} {eye} )");

    if pose.hand == HandGesture::Talking {
        line.push_str(" ~");
    }
    if pose.particles {
        line.push_str(" *");
    }
    if !state.message.is_empty() {
        line.push_str(&format!("  \"{}\"", state.message));
    }

    line
}

/// Redraw the face line on every pose or state change.
pub async fn run(
    name: String,
    mut pose_rx: watch::Receiver<AnimationPose>,
    mut state_rx: watch::Receiver<AvatarState>,
) {
    let mut stdout = std::io::stdout();
    loop {
        let line = {
            let pose = *pose_rx.borrow_and_update();
            let state = state_rx.borrow_and_update().clone();
            render(&pose, &state)
        };
        // Redraw in place; pad to clear leftovers from a longer line.
        let _ = write!(stdout, "\r{name}: {line:<70}");
        let _ = stdout.flush();

        tokio::select! {
            changed = pose_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("View stopped");
}
