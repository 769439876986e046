use rand::seq::SliceRandom;
use rand::Rng;

use crate::quiz::Question;

/// Returns the questions in a uniformly random order.
///
/// `SliceRandom::shuffle` is a Fisher–Yates pass from the last index down,
/// swapping each element with a uniformly chosen one at or below it. The
/// random source is injected so tests can run with a seeded generator.
pub fn shuffle<R: Rng + ?Sized>(questions: &[Question], rng: &mut R) -> Vec<Question> {
    let mut shuffled = questions.to_vec();
    shuffled.shuffle(rng);
    shuffled
}
