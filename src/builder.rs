//! [LazyListBuilder] builds a [LazyList] by mapping one generator over a list of inputs.
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use crate::*;

type Generator<I, T, E> = Arc<dyn Fn(&I) -> Result<T, E> + Send + Sync>;

pub struct LazyListBuilder<I, T, E = Infallible> {
    generator: Generator<I, T, E>,
    inputs: Vec<I>,
    working_set: Option<usize>,
}

impl<I, T, E> LazyListBuilder<I, T, E>
where
    I: Send + Sync + 'static,
    T: Send + Sync + 'static,
    E: 'static,
{
    pub fn try_using<F>(generator: F) -> LazyListBuilder<I, T, E>
    where
        F: Fn(&I) -> Result<T, E> + Send + Sync + 'static,
    {
        LazyListBuilder {
            generator: Arc::new(generator),
            inputs: vec![],
            working_set: None,
        }
    }

    /// Keep at most `size` elements of the built list materialized.
    pub fn with_working_set(mut self, size: usize) -> LazyListBuilder<I, T, E> {
        self.working_set = Some(size);
        self
    }

    pub fn add(mut self, input: I) -> LazyListBuilder<I, T, E> {
        self.inputs.push(input);
        self
    }

    pub fn add_all<It: IntoIterator<Item = I>>(mut self, inputs: It) -> LazyListBuilder<I, T, E> {
        self.inputs.extend(inputs);
        self
    }

    /// Build the list.  Nothing is generated until an element is read.
    pub fn build(self) -> Result<LazyList<T, E>, ConfigError> {
        let mut list = match self.working_set {
            Some(size) => LazyList::with_working_set(self.inputs.len(), size)?,
            None => LazyList::with_capacity(self.inputs.len()),
        };
        for input in self.inputs {
            let generator = self.generator.clone();
            list.try_push(move || generator(&input));
        }
        Ok(list)
    }
}

impl<I, T> LazyListBuilder<I, T, Infallible>
where
    I: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub fn using<F>(generator: F) -> LazyListBuilder<I, T, Infallible>
    where
        F: Fn(&I) -> T + Send + Sync + 'static,
    {
        Self::try_using(move |x| Ok(generator(x)))
    }
}

impl<I, T, E> fmt::Debug for LazyListBuilder<I, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyListBuilder")
            .field("inputs", &self.inputs.len())
            .field("working_set", &self.working_set)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_builds_lazily_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let list = LazyListBuilder::using(move |x: &u32| {
            c.fetch_add(1, Ordering::SeqCst);
            x * 2
        })
        .add(1)
        .add_all(vec![2, 3])
        .build()
        .unwrap();

        assert_eq!(list.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(*list.get(2).unwrap(), 6);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let all = list.iter().map(|x| *x.unwrap()).collect::<Vec<_>>();
        assert_eq!(all, vec![2, 4, 6]);
    }

    #[test]
    fn test_working_set() {
        let list = LazyListBuilder::using(|x: &usize| *x)
            .add_all(0..6)
            .with_working_set(2)
            .build()
            .unwrap();
        assert_eq!(list.working_set_size(), Some(2));
        for i in 0..6 {
            list.get(i).unwrap();
        }
        assert_eq!(list.materialized_count(), 2);
        assert!(list.slot(5).unwrap().has_run());
    }

    #[test]
    fn test_bad_working_set() {
        let err = LazyListBuilder::using(|x: &u8| *x)
            .with_working_set(0)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidCapacity(0));
    }

    #[test]
    fn test_fallible_generator() {
        let list = LazyListBuilder::try_using(|x: &i32| if *x < 0 { Err("negative") } else { Ok(*x) })
            .add_all(vec![1, -1])
            .build()
            .unwrap();
        assert_eq!(*list.get(0).unwrap(), 1);
        assert_eq!(list.get(1).unwrap_err(), LazyError::Computation("negative"));
    }
}
