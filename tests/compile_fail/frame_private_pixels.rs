// Rationale: frame pixel bytes must remain private; reads go through pixels().
use sightline::Frame;

fn main() {
    let frame: Frame = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
    let _bytes = frame.data;
}
