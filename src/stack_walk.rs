//! Invocation-line discovery by walking the call stack
//!
//! Class initializers have no call site of their own: the line they should
//! attribute themselves to belongs to whatever in-scope method triggered
//! class initialization. That line is found by walking the call stack from
//! the innermost frame outward, skipping a fixed number of tracer-internal
//! frames, and taking the first frame that belongs to an in-scope class.
//!
//! The mechanism sits behind a narrow trait so the rewrite logic never
//! depends on how frames are obtained.

/// Maximum frames considered per walk (guards against runaway stacks)
const MAX_WALK_DEPTH: usize = 64;

/// One observed frame: the executing class and its current line
#[derive(Debug, Clone)]
pub struct FrameView {
    /// Slash-qualified class name
    pub class_name: String,
    /// Current line; 0 when the frame has not reached a line marker yet
    pub line: u32,
}

/// Source of invocation lines
pub trait StackWalker {
    /// The current line of the first in-scope frame, walking innermost-out
    /// after skipping `skip_frames` tracer-internal frames
    ///
    /// Returns `None` when no in-scope frame with real line metadata exists;
    /// callers treat that as "no line", never as an error.
    fn invocation_line(&self, skip_frames: usize, in_scope: &dyn Fn(&str) -> bool) -> Option<u32>;
}

/// A walker over an explicit frame slice, outermost first
///
/// The execution host hands its shadow stack to the recorder through this.
pub struct ShadowStack<'a> {
    frames: &'a [FrameView],
}

impl<'a> ShadowStack<'a> {
    pub fn new(frames: &'a [FrameView]) -> Self {
        Self { frames }
    }
}

impl StackWalker for ShadowStack<'_> {
    fn invocation_line(&self, skip_frames: usize, in_scope: &dyn Fn(&str) -> bool) -> Option<u32> {
        self.frames
            .iter()
            .rev()
            .take(MAX_WALK_DEPTH)
            .skip(skip_frames)
            .find(|f| f.line != 0 && in_scope(&f.class_name))
            .map(|f| f.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(class: &str, line: u32) -> FrameView {
        FrameView {
            class_name: class.to_string(),
            line,
        }
    }

    #[test]
    fn test_innermost_in_scope_frame_wins() {
        let frames = vec![frame("demo/Main", 10), frame("demo/Helper", 42)];
        let stack = ShadowStack::new(&frames);
        let line = stack.invocation_line(0, &|_| true);
        assert_eq!(line, Some(42));
    }

    #[test]
    fn test_skip_frames_moves_outward() {
        let frames = vec![frame("demo/Main", 10), frame("demo/Helper", 42)];
        let stack = ShadowStack::new(&frames);
        let line = stack.invocation_line(1, &|_| true);
        assert_eq!(line, Some(10));
    }

    #[test]
    fn test_out_of_scope_frames_are_passed_over() {
        let frames = vec![
            frame("demo/Main", 10),
            frame("java/util/ArrayList", 99),
            frame("demo/Helper", 0),
        ];
        let stack = ShadowStack::new(&frames);
        let line = stack.invocation_line(0, &|c| c.starts_with("demo/"));
        assert_eq!(line, Some(10));
    }

    #[test]
    fn test_zero_line_frames_do_not_count() {
        let frames = vec![frame("demo/Main", 0)];
        let stack = ShadowStack::new(&frames);
        assert_eq!(stack.invocation_line(0, &|_| true), None);
    }

    #[test]
    fn test_empty_stack_yields_none() {
        let frames: Vec<FrameView> = vec![];
        let stack = ShadowStack::new(&frames);
        assert_eq!(stack.invocation_line(0, &|_| true), None);
    }

    #[test]
    fn test_skip_beyond_stack_yields_none() {
        let frames = vec![frame("demo/Main", 10)];
        let stack = ShadowStack::new(&frames);
        assert_eq!(stack.invocation_line(5, &|_| true), None);
    }
}
