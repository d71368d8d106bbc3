mod lifecycle;
mod ordering;
